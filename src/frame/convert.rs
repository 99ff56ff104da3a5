//! Pixel format normalization to tightly packed (R,G,B).
//!
//! RGB565 expansion is plain bit replication (`r5 << 3`, `g6 << 2`,
//! `b5 << 3`), so full-intensity channels come out as 0xF8/0xFC rather
//! than 0xFF.

use std::borrow::Cow;

use super::{CanonicalFrame, PixelFormat, RawFrame, RGB_BYTES};
use crate::error::{MirrorError, Result};

const RGBA8888_MASK_RED: u32 = 0x00FF_0000;
const RGBA8888_MASK_GREEN: u32 = 0x0000_FF00;
const RGBA8888_MASK_BLUE: u32 = 0x0000_00FF;

const RGB565_MASK_RED: u16 = 0x001F;
const RGB565_MASK_GREEN: u16 = 0x07E0;
const RGB565_MASK_BLUE: u16 = 0xF800;

/// Convert `pixel_count` pixels of `format` from `src` into `dst` as (R,G,B).
///
/// Everything is validated before the first byte of `dst` is written, so a
/// failed call leaves `dst` untouched. `dst` is never allocated here.
pub fn convert(format: PixelFormat, src: &[u8], dst: &mut [u8], pixel_count: usize) -> Result<()> {
    if pixel_count == 0 {
        return Err(MirrorError::InvalidInput("pixel count must be positive".into()));
    }
    let src_len = pixel_count
        .checked_mul(format.bytes_per_pixel())
        .ok_or_else(|| MirrorError::InvalidInput("pixel count overflows".into()))?;
    let dst_len = pixel_count
        .checked_mul(RGB_BYTES)
        .ok_or_else(|| MirrorError::InvalidInput("pixel count overflows".into()))?;
    if src.len() < src_len {
        return Err(MirrorError::InvalidInput(format!(
            "source holds {} bytes, {} pixels of {:?} need {}",
            src.len(),
            pixel_count,
            format,
            src_len
        )));
    }
    if dst.len() < dst_len {
        return Err(MirrorError::InvalidInput(format!(
            "destination holds {} bytes, need {}",
            dst.len(),
            dst_len
        )));
    }

    let src = &src[..src_len];
    let dst = &mut dst[..dst_len];
    match format {
        PixelFormat::Rgba8888 => rgba8888_to_rgb888(src, dst),
        PixelFormat::Rgb565 => rgb565_to_rgb888(src, dst),
        PixelFormat::Rgb888 => dst.copy_from_slice(src),
    }
    Ok(())
}

fn rgba8888_to_rgb888(src: &[u8], dst: &mut [u8]) {
    for (px, out) in src.chunks_exact(4).zip(dst.chunks_exact_mut(RGB_BYTES)) {
        let word = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
        out[0] = ((word & RGBA8888_MASK_RED) >> 16) as u8;
        out[1] = ((word & RGBA8888_MASK_GREEN) >> 8) as u8;
        out[2] = (word & RGBA8888_MASK_BLUE) as u8;
    }
}

fn rgb565_to_rgb888(src: &[u8], dst: &mut [u8]) {
    for (px, out) in src.chunks_exact(2).zip(dst.chunks_exact_mut(RGB_BYTES)) {
        let word = u16::from_ne_bytes([px[0], px[1]]);
        out[0] = ((word & RGB565_MASK_RED) << 3) as u8;
        out[1] = (((word & RGB565_MASK_GREEN) >> 5) << 2) as u8;
        out[2] = (((word & RGB565_MASK_BLUE) >> 11) << 3) as u8;
    }
}

/// Normalize a raw frame into a canonical one.
///
/// Tightly packed RGB888 is passed through as a borrow. Padded rows are
/// converted one row at a time so stride padding never reaches the output.
pub fn to_canonical<'a>(frame: &RawFrame<'a>) -> Result<CanonicalFrame<'a>> {
    frame.validate()?;

    let width = frame.width as usize;
    let height = frame.height as usize;
    let stride = frame.row_stride as usize;
    let row_bytes = frame.row_bytes();
    let tight = stride == row_bytes;

    if frame.format == PixelFormat::Rgb888 && tight {
        let data: &'a [u8] = frame.data;
        return Ok(CanonicalFrame {
            width: frame.width,
            height: frame.height,
            data: Cow::Borrowed(&data[..row_bytes * height]),
        });
    }

    let out_row = width * RGB_BYTES;
    let mut rgb = vec![0u8; out_row * height];
    if tight {
        convert(frame.format, frame.data, &mut rgb, frame.pixel_count())?;
    } else {
        for (y, out) in rgb.chunks_exact_mut(out_row).enumerate() {
            let start = y * stride;
            convert(frame.format, &frame.data[start..start + row_bytes], out, width)?;
        }
    }

    Ok(CanonicalFrame {
        width: frame.width,
        height: frame.height,
        data: Cow::Owned(rgb),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::tight;

    fn rgba_words(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    fn rgb565_words(words: &[u16]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_ne_bytes()).collect()
    }

    #[test]
    fn test_rgba8888_extracts_channels_by_shift() {
        let words = [0xFF12_3456, 0x00AB_CDEF, 0x80FF_0000, 0x0000_00FF];
        let src = rgba_words(&words);
        let mut dst = vec![0u8; words.len() * 3];
        convert(PixelFormat::Rgba8888, &src, &mut dst, words.len()).unwrap();

        for (word, out) in words.iter().zip(dst.chunks_exact(3)) {
            assert_eq!(out[0], ((word >> 16) & 0xFF) as u8);
            assert_eq!(out[1], ((word >> 8) & 0xFF) as u8);
            assert_eq!(out[2], (word & 0xFF) as u8);
        }
        assert_eq!(&dst[..3], &[0x12, 0x34, 0x56]);
    }

    #[test]
    fn test_rgb565_bit_replication() {
        // red field lives in the low 5 bits, blue in the top 5
        let words = [0x001F, 0x07E0, 0xF800, 0xFFFF, 0x0000, 0b10101_101010_01010];
        let src = rgb565_words(&words);
        let mut dst = vec![0u8; words.len() * 3];
        convert(PixelFormat::Rgb565, &src, &mut dst, words.len()).unwrap();

        assert_eq!(&dst[0..3], &[0xF8, 0x00, 0x00]);
        assert_eq!(&dst[3..6], &[0x00, 0xFC, 0x00]);
        assert_eq!(&dst[6..9], &[0x00, 0x00, 0xF8]);
        assert_eq!(&dst[9..12], &[0xF8, 0xFC, 0xF8]);
        assert_eq!(&dst[12..15], &[0, 0, 0]);
        for (word, out) in words.iter().zip(dst.chunks_exact(3)) {
            assert_eq!(out[0], ((word & 0x1F) << 3) as u8);
            assert_eq!(out[1], (((word & 0x07E0) >> 5) << 2) as u8);
            assert_eq!(out[2], (((word & 0xF800) >> 11) << 3) as u8);
        }
    }

    #[test]
    fn test_rgb565_every_word() {
        let words: Vec<u16> = (0..=u16::MAX).collect();
        let src = rgb565_words(&words);
        let mut dst = vec![0u8; words.len() * 3];
        convert(PixelFormat::Rgb565, &src, &mut dst, words.len()).unwrap();

        for (word, out) in words.iter().zip(dst.chunks_exact(3)) {
            let r5 = (word & 0x1F) as u8;
            let g6 = ((word >> 5) & 0x3F) as u8;
            let b5 = (word >> 11) as u8;
            assert_eq!(out, &[r5 << 3, g6 << 2, b5 << 3], "word {:#06x}", word);
        }
    }

    #[test]
    fn test_rgb888_identity() {
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 12];
        convert(PixelFormat::Rgb888, &src, &mut dst, 4).unwrap();
        assert_eq!(src, dst);
    }

    #[test]
    fn test_invalid_input_writes_nothing() {
        let mut dst = vec![0xAAu8; 12];

        let err = convert(PixelFormat::Rgba8888, &[], &mut dst, 4).unwrap_err();
        assert!(matches!(err, MirrorError::InvalidInput(_)));
        assert!(dst.iter().all(|&b| b == 0xAA));

        let src = rgba_words(&[0xFFFF_FFFF; 4]);
        let err = convert(PixelFormat::Rgba8888, &src, &mut dst, 0).unwrap_err();
        assert!(matches!(err, MirrorError::InvalidInput(_)));
        assert!(dst.iter().all(|&b| b == 0xAA));

        let mut empty: [u8; 0] = [];
        assert!(convert(PixelFormat::Rgba8888, &src, &mut empty, 4).is_err());
    }

    #[test]
    fn test_rgb888_tight_passthrough_borrows() {
        let data: Vec<u8> = (0..18).collect();
        let frame = tight(3, 2, PixelFormat::Rgb888, &data);
        let canonical = to_canonical(&frame).unwrap();
        assert!(canonical.is_borrowed());
        assert_eq!(canonical.as_bytes(), &data[..]);
    }

    #[test]
    fn test_padded_rows_are_stripped() {
        // 2x2 RGBA with 4 bytes of padding per row
        let mut data = Vec::new();
        data.extend(0x0011_2233u32.to_ne_bytes());
        data.extend(0x0044_5566u32.to_ne_bytes());
        data.extend([0xEE; 4]);
        data.extend(0x0077_8899u32.to_ne_bytes());
        data.extend(0x00AA_BBCCu32.to_ne_bytes());
        data.extend([0xEE; 4]);

        let frame = RawFrame {
            width: 2,
            height: 2,
            row_stride: 12,
            format: PixelFormat::Rgba8888,
            data: &data,
        };
        let canonical = to_canonical(&frame).unwrap();
        assert!(!canonical.is_borrowed());
        assert_eq!(
            canonical.as_bytes(),
            &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC]
        );
    }

    #[test]
    fn test_canonical_length_is_exact() {
        let data = rgb565_words(&[0xFFFF; 6]);
        let frame = tight(3, 2, PixelFormat::Rgb565, &data);
        let canonical = to_canonical(&frame).unwrap();
        assert_eq!(canonical.as_bytes().len(), 3 * 2 * 3);
    }
}
