//! Compressed-tile decode dispatch.
//!
//! Takes a compressed buffer and a `(width, height)` target and produces
//! a fresh premultiplied-ARGB pixel buffer of exactly `w * h` words.
//! Dispatch is a closed enumeration over the ETS compression tag; unknown
//! tags are errors, never no-ops.

use image::DynamicImage;

use crate::error::SlideError;

/// Fully opaque alpha in the high byte of an ARGB word.
const OPAQUE: u32 = 0xFF00_0000;

// =============================================================================
// CodecTag
// =============================================================================

/// Tile compression codecs known to the ETS container.
///
/// PNG and BMP appear in the wild but are reserved: no decode path is
/// wired up for them yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecTag {
    /// 0: uncompressed samples
    Raw,
    /// 2: baseline JPEG
    Jpeg,
    /// 3: JPEG 2000 codestream
    Jp2k,
    /// 5: lossless JPEG
    JpegLossless,
    /// 8: PNG (reserved)
    Png,
    /// 9: BMP (reserved)
    Bmp,
}

impl CodecTag {
    /// Map an ETS compression tag to a codec.
    ///
    /// Unknown tags are fatal decode errors.
    pub fn from_ets_tag(tag: u32) -> Result<Self, SlideError> {
        match tag {
            0 => Ok(CodecTag::Raw),
            2 => Ok(CodecTag::Jpeg),
            3 => Ok(CodecTag::Jp2k),
            5 => Ok(CodecTag::JpegLossless),
            8 => Ok(CodecTag::Png),
            9 => Ok(CodecTag::Bmp),
            other => Err(SlideError::Decode(format!(
                "unknown ETS compression tag {}",
                other
            ))),
        }
    }
}

// =============================================================================
// Decode dispatch
// =============================================================================

/// Decode a compressed tile to premultiplied ARGB.
///
/// The decoded image must match the declared `(width, height)`; a
/// mismatch means the directory and the payload disagree and is treated
/// as a decode failure.
pub fn decode_tile(
    tag: CodecTag,
    data: &[u8],
    width: u32,
    height: u32,
) -> Result<Vec<u32>, SlideError> {
    let img = match tag {
        CodecTag::Jpeg => image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .map_err(|e| SlideError::Decode(format!("JPEG: {}", e)))?,
        CodecTag::Jp2k => {
            let jp2 = jpeg2k::Image::from_bytes(data)
                .map_err(|e| SlideError::Decode(format!("JP2K: {}", e)))?;
            DynamicImage::try_from(&jp2)
                .map_err(|e| SlideError::Decode(format!("JP2K: {}", e)))?
        }
        CodecTag::Raw | CodecTag::JpegLossless | CodecTag::Png | CodecTag::Bmp => {
            return Err(SlideError::Unsupported(format!(
                "no decode path for {:?} tiles",
                tag
            )))
        }
    };

    if img.width() != width || img.height() != height {
        return Err(SlideError::Decode(format!(
            "tile decoded to {}x{}, directory declares {}x{}",
            img.width(),
            img.height(),
            width,
            height
        )));
    }

    let rgb = img.to_rgb8();
    Ok(pack_rgb(rgb.as_raw(), width, height))
}

/// Pack interleaved 8-bit RGB samples into opaque ARGB words.
pub fn pack_rgb(samples: &[u8], width: u32, height: u32) -> Vec<u32> {
    let pixels = (width as usize) * (height as usize);
    let mut out = Vec::with_capacity(pixels);
    for px in samples.chunks_exact(3).take(pixels) {
        out.push(OPAQUE | (px[0] as u32) << 16 | (px[1] as u32) << 8 | px[2] as u32);
    }
    out
}

/// Pack uncompressed TIFF samples (8-bit, 1 or 3 per pixel) into ARGB.
pub fn pack_samples(
    samples: &[u8],
    width: u32,
    height: u32,
    samples_per_pixel: u32,
) -> Result<Vec<u32>, SlideError> {
    let pixels = (width as usize) * (height as usize);
    let needed = pixels * samples_per_pixel as usize;
    if samples.len() < needed {
        return Err(SlideError::Decode(format!(
            "raw tile has {} bytes, {}x{}x{} needs {}",
            samples.len(),
            width,
            height,
            samples_per_pixel,
            needed
        )));
    }

    match samples_per_pixel {
        1 => Ok(samples[..pixels]
            .iter()
            .map(|&g| {
                let g = g as u32;
                OPAQUE | g << 16 | g << 8 | g
            })
            .collect()),
        3 => Ok(pack_rgb(samples, width, height)),
        other => Err(SlideError::Unsupported(format!(
            "{} samples per pixel",
            other
        ))),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::{ImageBuffer, Rgb};

    fn encode_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(width, height, Rgb(color));
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 95)
            .encode_image(&img)
            .unwrap();
        out
    }

    #[test]
    fn test_codec_tag_mapping() {
        assert_eq!(CodecTag::from_ets_tag(0).unwrap(), CodecTag::Raw);
        assert_eq!(CodecTag::from_ets_tag(2).unwrap(), CodecTag::Jpeg);
        assert_eq!(CodecTag::from_ets_tag(3).unwrap(), CodecTag::Jp2k);
        assert_eq!(CodecTag::from_ets_tag(8).unwrap(), CodecTag::Png);
        assert_eq!(CodecTag::from_ets_tag(9).unwrap(), CodecTag::Bmp);
    }

    #[test]
    fn test_codec_tag_unknown_is_error() {
        for tag in [1u32, 4, 6, 7, 100] {
            assert!(matches!(
                CodecTag::from_ets_tag(tag),
                Err(SlideError::Decode(_))
            ));
        }
    }

    #[test]
    fn test_decode_jpeg_tile() {
        let data = encode_jpeg(16, 16, [200, 100, 50]);
        let pixels = decode_tile(CodecTag::Jpeg, &data, 16, 16).unwrap();

        assert_eq!(pixels.len(), 256);
        // Every pixel is opaque; JPEG is lossy so compare loosely
        for &px in &pixels {
            assert_eq!(px >> 24, 0xFF);
            let r = (px >> 16) & 0xFF;
            assert!(r.abs_diff(200) < 16);
        }
    }

    #[test]
    fn test_decode_jpeg_is_deterministic() {
        let data = encode_jpeg(8, 8, [10, 20, 30]);
        let a = decode_tile(CodecTag::Jpeg, &data, 8, 8).unwrap();
        let b = decode_tile(CodecTag::Jpeg, &data, 8, 8).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_dimension_mismatch() {
        let data = encode_jpeg(16, 16, [0, 0, 0]);
        let err = decode_tile(CodecTag::Jpeg, &data, 32, 32).unwrap_err();
        assert!(matches!(err, SlideError::Decode(_)));
    }

    #[test]
    fn test_decode_garbage_jpeg() {
        let err = decode_tile(CodecTag::Jpeg, &[0xDE, 0xAD, 0xBE, 0xEF], 4, 4).unwrap_err();
        assert!(matches!(err, SlideError::Decode(_)));
    }

    #[test]
    fn test_reserved_codecs_unsupported() {
        for tag in [CodecTag::Png, CodecTag::Bmp, CodecTag::Raw, CodecTag::JpegLossless] {
            assert!(matches!(
                decode_tile(tag, &[], 4, 4),
                Err(SlideError::Unsupported(_))
            ));
        }
    }

    #[test]
    fn test_pack_rgb() {
        let pixels = pack_rgb(&[1, 2, 3, 4, 5, 6], 2, 1);
        assert_eq!(pixels, vec![0xFF010203, 0xFF040506]);
    }

    #[test]
    fn test_pack_samples_gray() {
        let pixels = pack_samples(&[0x80, 0x00], 2, 1, 1).unwrap();
        assert_eq!(pixels, vec![0xFF808080, 0xFF000000]);
    }

    #[test]
    fn test_pack_samples_short_buffer() {
        assert!(pack_samples(&[1, 2, 3], 2, 1, 3).is_err());
    }

    #[test]
    fn test_pack_samples_unsupported_count() {
        assert!(matches!(
            pack_samples(&[0; 16], 2, 2, 4),
            Err(SlideError::Unsupported(_))
        ));
    }
}
