//! JPEG compression of canonical RGB frames.
//!
//! Rows are fed into a [`CompressSession`] top to bottom; the session owns
//! every buffer it touches, so any early return (bad input, engine error)
//! simply drops it and nothing leaks or is half-returned.

use image::codecs::jpeg::JpegEncoder as ImageJpegEncoder;
use image::{ImageBuffer, RgbImage};
use std::io::Cursor;

use crate::error::{MirrorError, Result};
use crate::frame::{CanonicalFrame, EncodedFrame, RGB_BYTES};

/// Default JPEG quality (1-100).
pub const DEFAULT_QUALITY: u8 = 50;
/// JPEG cannot describe images larger than this in either dimension.
pub const MAX_DIMENSION: u32 = u16::MAX as u32;

/// One in-progress compression, bound to fixed dimensions and 3-component RGB.
pub struct CompressSession {
    width: u32,
    height: u32,
    next_scanline: u32,
    pixels: Vec<u8>,
}

impl CompressSession {
    /// Reject sizes JPEG cannot describe.
    pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 || width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(MirrorError::Encode(format!(
                "unsupported dimensions {}x{}",
                width, height
            )));
        }
        Ok(())
    }

    pub fn begin(width: u32, height: u32) -> Result<Self> {
        Self::check_dimensions(width, height)?;
        Ok(Self {
            width,
            height,
            next_scanline: 0,
            pixels: Vec::with_capacity(width as usize * height as usize * RGB_BYTES),
        })
    }

    pub fn next_scanline(&self) -> u32 {
        self.next_scanline
    }

    fn row_len(&self) -> usize {
        self.width as usize * RGB_BYTES
    }

    /// Submit the next row, `width * 3` bytes.
    pub fn write_scanline(&mut self, row: &[u8]) -> Result<()> {
        if self.next_scanline >= self.height {
            return Err(MirrorError::Encode(format!(
                "scanline {} past image height {}",
                self.next_scanline, self.height
            )));
        }
        if row.len() != self.row_len() {
            return Err(MirrorError::Encode(format!(
                "scanline {} is {} bytes, expected {}",
                self.next_scanline,
                row.len(),
                self.row_len()
            )));
        }
        self.pixels.extend_from_slice(row);
        self.next_scanline += 1;
        Ok(())
    }

    /// Close the session and produce the compressed image.
    pub fn finish(self, quality: u8) -> Result<EncodedFrame> {
        if self.next_scanline() < self.height {
            return Err(MirrorError::Encode(format!(
                "finished after {} of {} scanlines",
                self.next_scanline(),
                self.height
            )));
        }

        let img: RgbImage = ImageBuffer::from_raw(self.width, self.height, self.pixels)
            .ok_or_else(|| MirrorError::Encode("invalid image dimensions".into()))?;

        let mut buf = Cursor::new(Vec::new());
        let encoder = ImageJpegEncoder::new_with_quality(&mut buf, quality);
        img.write_with_encoder(encoder)
            .map_err(|e| MirrorError::Encode(e.to_string()))?;

        Ok(EncodedFrame {
            data: buf.into_inner(),
        })
    }
}

/// Fixed-quality JPEG encoder for canonical frames.
#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: u8,
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Compress `width * height` RGB pixels.
    pub fn encode(&self, width: u32, height: u32, rgb: &[u8]) -> Result<EncodedFrame> {
        if rgb.is_empty() {
            return Err(MirrorError::Encode("input buffer is empty".into()));
        }
        CompressSession::check_dimensions(width, height)?;
        let row_len = width as usize * RGB_BYTES;
        let needed = row_len
            .checked_mul(height as usize)
            .ok_or_else(|| MirrorError::Encode("image size overflows".into()))?;
        if rgb.len() < needed {
            return Err(MirrorError::Encode(format!(
                "input holds {} bytes, {}x{} RGB needs {}",
                rgb.len(),
                width,
                height,
                needed
            )));
        }

        let mut session = CompressSession::begin(width, height)?;
        for row in rgb[..needed].chunks_exact(row_len) {
            session.write_scanline(row)?;
        }
        session.finish(self.quality)
    }

    pub fn encode_frame(&self, frame: &CanonicalFrame<'_>) -> Result<EncodedFrame> {
        self.encode(frame.width, frame.height, frame.as_bytes())
    }
}
