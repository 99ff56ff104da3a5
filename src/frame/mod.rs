pub mod convert;

use std::borrow::Cow;

use crate::error::{MirrorError, Result};

/// Bytes per pixel of a canonical (R,G,B) frame.
pub const RGB_BYTES: usize = 3;
/// Largest payload the 4-byte length prefix may announce.
pub const MAX_ENCODED_SIZE: u64 = 0x7fff_ffff;

/// Pixel encodings the capture subsystem may hand us.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 32-bit word per pixel: red in bits 16-23, green 8-15, blue 0-7, alpha ignored.
    Rgba8888,
    /// 16-bit word per pixel, 5/6/5 bits.
    Rgb565,
    /// Already canonical.
    Rgb888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8888 => 4,
            Self::Rgb565 => 2,
            Self::Rgb888 => 3,
        }
    }
}

/// A frame as produced by the capture side. Borrowed for one cycle.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub width: u32,
    pub height: u32,
    /// Bytes between the starts of consecutive rows (may include padding).
    pub row_stride: u32,
    pub format: PixelFormat,
    pub data: &'a [u8],
}

impl RawFrame<'_> {
    /// Bytes of pixel data per row, without padding.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Check the geometry against the buffer before anything reads it.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MirrorError::InvalidInput(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        let stride = self.row_stride as usize;
        if stride < self.row_bytes() {
            return Err(MirrorError::InvalidInput(format!(
                "row stride {} shorter than {} bytes of pixels",
                stride,
                self.row_bytes()
            )));
        }
        let needed = stride
            .checked_mul(self.height as usize)
            .ok_or_else(|| MirrorError::InvalidInput("frame size overflows".into()))?;
        if self.data.len() < needed {
            return Err(MirrorError::InvalidInput(format!(
                "buffer holds {} bytes, geometry needs {}",
                self.data.len(),
                needed
            )));
        }
        Ok(())
    }
}

/// Tightly packed (R,G,B) frame, `width * height * 3` bytes.
#[derive(Debug, Clone)]
pub struct CanonicalFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub data: Cow<'a, [u8]>,
}

impl CanonicalFrame<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// True when the raw buffer was passed through without a copy.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }
}

/// JPEG bytes ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
}

impl EncodedFrame {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// The 4-byte little-endian size that precedes the payload on the wire.
    pub fn length_prefix(&self) -> Result<[u8; 4]> {
        let size = self.size();
        if size > MAX_ENCODED_SIZE {
            return Err(MirrorError::FrameTooLarge(size));
        }
        Ok((size as u32).to_le_bytes())
    }
}
