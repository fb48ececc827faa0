use std::io::Cursor;
use std::sync::Arc;

use image::{imageops, ImageFormat, ImageReader, Rgba, RgbaImage};

use crate::map::Preview;

pub type Bitmap = Arc<RgbaImage>;

pub const DEFAULT_MAX_PIXELS: u64 = 4 * 1024 * 1024;
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 256;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("map has no preview")]
    Missing,
    #[error("malformed preview: {0}")]
    Malformed(String),
    #[error("unsupported preview format ({0})")]
    Unsupported(String),
    #[error("preview of {width}x{height} exceeds the {limit} pixel limit")]
    TooLarge { width: u32, height: u32, limit: u64 },
    #[error("corrupt preview image: {0}")]
    Image(#[from] image::ImageError),
    #[error("preview decoder panicked")]
    Panicked,
    #[error("decode workers have stopped")]
    Stopped,
}

/// Turns a raw preview payload into a displayable bitmap. Runs on decode workers, never the UI thread.
pub trait Decoder: Send + Sync {
    fn decode(&self, preview: &Preview) -> Result<Bitmap, DecodeError>;
}

#[derive(Debug, Clone)]
pub struct PreviewDecoder {
    max_pixels: u64,
    thumbnail_size: u32,
}

impl Default for PreviewDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PIXELS, DEFAULT_THUMBNAIL_SIZE)
    }
}

impl PreviewDecoder {
    pub fn new(max_pixels: u64, thumbnail_size: u32) -> Self {
        Self {
            max_pixels: if max_pixels == 0 {
                DEFAULT_MAX_PIXELS
            } else {
                max_pixels
            },
            thumbnail_size,
        }
    }

    fn check_size(&self, width: u32, height: u32) -> Result<(), DecodeError> {
        if u64::from(width) * u64::from(height) > self.max_pixels {
            return Err(DecodeError::TooLarge {
                width,
                height,
                limit: self.max_pixels,
            });
        }
        Ok(())
    }

    fn decode_encoded(&self, bytes: &[u8]) -> Result<RgbaImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Malformed("empty image payload".into()));
        }
        let format = match image::guess_format(bytes) {
            Ok(
                format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif | ImageFormat::WebP),
            ) => format,
            Ok(other) => return Err(DecodeError::Unsupported(format!("{other:?}"))),
            Err(_) => return Err(DecodeError::Unsupported(detect_mime(bytes))),
        };
        let (width, height) =
            ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()?;
        self.check_size(width, height)?;
        let decoded = ImageReader::with_format(Cursor::new(bytes), format).decode()?;
        Ok(decoded.to_rgba8())
    }

    fn decode_packed(
        &self,
        width: u32,
        height: u32,
        pixels: &[u16],
    ) -> Result<RgbaImage, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::Malformed(format!(
                "packed preview has empty dimensions {width}x{height}"
            )));
        }
        self.check_size(width, height)?;
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(DecodeError::Malformed(format!(
                "packed preview has {} pixels, expected {expected}",
                pixels.len()
            )));
        }
        let mut image = RgbaImage::new(width, height);
        for (target, packed) in image.pixels_mut().zip(pixels.iter()) {
            *target = rgba5551(*packed);
        }
        Ok(image)
    }

    fn shrink(&self, image: RgbaImage) -> RgbaImage {
        let limit = self.thumbnail_size;
        if limit == 0 || (image.width() <= limit && image.height() <= limit) {
            return image;
        }
        let scale = f64::from(limit) / f64::from(image.width().max(image.height()));
        let width = ((f64::from(image.width()) * scale).round() as u32).max(1);
        let height = ((f64::from(image.height()) * scale).round() as u32).max(1);
        imageops::thumbnail(&image, width, height)
    }
}

impl Decoder for PreviewDecoder {
    fn decode(&self, preview: &Preview) -> Result<Bitmap, DecodeError> {
        let image = match preview {
            Preview::Encoded(bytes) => self.decode_encoded(bytes)?,
            Preview::Rgba5551 {
                width,
                height,
                pixels,
            } => self.decode_packed(*width, *height, pixels)?,
            Preview::Missing => return Err(DecodeError::Missing),
        };
        Ok(Arc::new(self.shrink(image)))
    }
}

/// Expands a 5-5-5-1 packed colour (red in the high bits, alpha in bit 0).
pub fn rgba5551(packed: u16) -> Rgba<u8> {
    let expand = |value: u16| -> u8 {
        let value = (value & 0x1f) as u8;
        (value << 3) | (value >> 2)
    };
    Rgba([
        expand(packed >> 11),
        expand(packed >> 6),
        expand(packed >> 1),
        if packed & 1 == 1 { 0xff } else { 0 },
    ])
}

fn detect_mime(bytes: &[u8]) -> String {
    tree_magic_mini::from_u8(&bytes[..bytes.len().min(512)]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn expands_packed_colours() {
        assert_eq!(rgba5551(0xffff), Rgba([255, 255, 255, 255]));
        assert_eq!(rgba5551(0xf801), Rgba([255, 0, 0, 255]));
        assert_eq!(rgba5551(0x0000), Rgba([0, 0, 0, 0]));
        assert_eq!(rgba5551(0x003f), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn decodes_packed_preview() {
        let preview = Preview::Rgba5551 {
            width: 2,
            height: 1,
            pixels: vec![0xf801, 0x07c1].into(),
        };
        let bitmap = PreviewDecoder::default().decode(&preview).unwrap();
        assert_eq!(bitmap.dimensions(), (2, 1));
        assert_eq!(*bitmap.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
        assert_eq!(*bitmap.get_pixel(1, 0), Rgba([0, 255, 0, 255]));
    }

    #[test]
    fn rejects_short_packed_preview() {
        let preview = Preview::Rgba5551 {
            width: 2,
            height: 2,
            pixels: vec![0; 3].into(),
        };
        let err = PreviewDecoder::default().decode(&preview).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)), "{err}");
    }

    #[test]
    fn decodes_and_shrinks_png() {
        let preview = Preview::Encoded(png(64, 32).into());
        let bitmap = PreviewDecoder::new(0, 16).decode(&preview).unwrap();
        assert_eq!(bitmap.dimensions(), (16, 8));
        assert_eq!(bitmap.get_pixel(3, 3).0[..3], [10, 20, 30]);
    }

    #[test]
    fn enforces_pixel_limit() {
        let preview = Preview::Encoded(png(40, 40).into());
        let err = PreviewDecoder::new(100, 0).decode(&preview).unwrap_err();
        assert!(matches!(err, DecodeError::TooLarge { width: 40, height: 40, .. }));
    }

    fn crc32(data: &[u8]) -> u32 {
        let mut crc = 0xffff_ffffu32;
        for byte in data {
            crc ^= u32::from(*byte);
            for _ in 0..8 {
                let mask = (crc & 1).wrapping_neg();
                crc = (crc >> 1) ^ (0xedb8_8320 & mask);
            }
        }
        !crc
    }

    #[test]
    fn oversized_header_is_rejected_before_decoding() {
        let mut bytes = png(1, 1);
        // IHDR data follows the 8-byte signature, chunk length and chunk type.
        bytes[16..20].copy_from_slice(&30_000u32.to_be_bytes());
        bytes[20..24].copy_from_slice(&30_000u32.to_be_bytes());
        let crc = crc32(&bytes[12..29]);
        bytes[29..33].copy_from_slice(&crc.to_be_bytes());

        let err = PreviewDecoder::default()
            .decode(&Preview::Encoded(bytes.into()))
            .unwrap_err();
        assert!(
            matches!(err, DecodeError::TooLarge { width: 30_000, height: 30_000, .. }),
            "{err:?}"
        );
    }

    #[test]
    fn reports_unknown_payloads() {
        let preview = Preview::Encoded(b"plain text, not an image".to_vec().into());
        let err = PreviewDecoder::default().decode(&preview).unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported(_)), "{err}");
        assert!(matches!(
            PreviewDecoder::default().decode(&Preview::Missing),
            Err(DecodeError::Missing)
        ));
    }
}
