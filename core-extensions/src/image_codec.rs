//! # Image Codec Pipeline
//!
//! Raster helpers exposed to extensions that descramble DRM page images.
//!
//! Extensions typically cut a scrambled page into tiles and draw each tile at
//! its real position. [`Canvas`] only records those draw calls; the source is
//! decoded once, and only when [`Canvas::encode`] is called.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};
use std::io::Cursor;
use tracing::debug;

use crate::error::CodecError;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

/// Read image dimensions from the header without decoding pixels.
///
/// Unrecognized or truncated input yields `0x0`.
pub fn decode_header(data: &[u8]) -> ImageSize {
    if data.starts_with(&JPEG_SOI) {
        jpeg_size(data).unwrap_or_default()
    } else if data.starts_with(&PNG_SIGNATURE) {
        png_size(data).unwrap_or_default()
    } else {
        ImageSize::default()
    }
}

/// Mime type from the magic bytes, for the formats `decode_header` reads.
pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&JPEG_SOI) {
        Some("image/jpeg")
    } else if data.starts_with(&PNG_SIGNATURE) {
        Some("image/png")
    } else {
        None
    }
}

fn be16(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]) as u32)
}

fn be32(data: &[u8], at: usize) -> Option<u32> {
    let bytes = data.get(at..at + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn jpeg_size(data: &[u8]) -> Option<ImageSize> {
    let mut offset = JPEG_SOI.len();
    loop {
        if *data.get(offset)? != 0xFF {
            return None;
        }
        let marker = *data.get(offset + 1)?;
        match marker {
            // Fill byte before the real marker
            0xFF => offset += 1,
            // SOF0-SOF3: [FF Cx] [len:2] [precision:1] [height:2] [width:2]
            0xC0..=0xC3 => {
                return Some(ImageSize {
                    height: be16(data, offset + 5)?,
                    width: be16(data, offset + 7)?,
                });
            }
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD8 => offset += 2,
            0xD9 | 0xDA => return None,
            _ => {
                let length = be16(data, offset + 2)? as usize;
                offset += 2 + length;
            }
        }
    }
}

fn png_size(data: &[u8]) -> Option<ImageSize> {
    // signature(8) + chunk length(4) + "IHDR"(4) + width(4) + height(4)
    if data.get(12..16)? != b"IHDR" {
        return None;
    }
    Some(ImageSize {
        width: be32(data, 16)?,
        height: be32(data, 20)?,
    })
}

/// Encoded image bytes with their header dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl RasterBuffer {
    pub fn new(data: Bytes) -> Self {
        let size = decode_header(&data);
        Self {
            width: size.width,
            height: size.height,
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DrawOp {
    source: Rect,
    dest_x: u32,
    dest_y: u32,
}

/// Largest canvas edge accepted from extension code.
pub const MAX_CANVAS_DIMENSION: u32 = 16_384;

/// Deferred compositing surface.
///
/// Every draw call must use the same source; the first one seen is kept.
pub struct Canvas {
    width: u32,
    height: u32,
    quality: u8,
    source: Option<Bytes>,
    decoded: Option<DynamicImage>,
    ops: Vec<DrawOp>,
}

impl Canvas {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width,
            height,
            quality: quality.clamp(1, 100),
            source: None,
            decoded: None,
            ops: Vec::new(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn queued_ops(&self) -> usize {
        self.ops.len()
    }

    /// Queue a copy of `source` rect from `image` to `(dest_x, dest_y)`.
    ///
    /// # Errors
    ///
    /// [`CodecError::SourceMismatch`] if `image` differs from the source of an
    /// earlier call.
    pub fn draw_image(
        &mut self,
        image: &RasterBuffer,
        source: Rect,
        dest_x: u32,
        dest_y: u32,
    ) -> Result<(), CodecError> {
        match &self.source {
            Some(existing) if existing != &image.data => return Err(CodecError::SourceMismatch),
            Some(_) => {}
            None => self.source = Some(image.data.clone()),
        }
        self.ops.push(DrawOp {
            source,
            dest_x,
            dest_y,
        });
        Ok(())
    }

    /// Replay queued draws onto a fresh surface and serialize it.
    pub fn encode(&mut self, mime_type: &str) -> Result<Bytes, CodecError> {
        let format = match mime_type.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => ImageFormat::Jpeg,
            "image/png" => ImageFormat::Png,
            other => return Err(CodecError::UnsupportedMime(other.to_string())),
        };

        if self.width == 0
            || self.height == 0
            || self.width > MAX_CANVAS_DIMENSION
            || self.height > MAX_CANVAS_DIMENSION
        {
            return Err(CodecError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }

        if self.decoded.is_none() {
            let source = self.source.as_ref().ok_or(CodecError::EmptyCanvas)?;
            self.decoded = Some(image::load_from_memory(source)?);
        }
        let decoded = self.decoded.as_ref().ok_or(CodecError::EmptyCanvas)?;

        let mut surface = RgbaImage::new(self.width, self.height);
        for op in &self.ops {
            let tile = decoded
                .view(
                    op.source.x.min(decoded.width()),
                    op.source.y.min(decoded.height()),
                    op.source.width.min(decoded.width().saturating_sub(op.source.x)),
                    op.source.height.min(decoded.height().saturating_sub(op.source.y)),
                )
                .to_image();
            image::imageops::replace(&mut surface, &tile, op.dest_x as i64, op.dest_y as i64);
        }
        debug!(
            width = self.width,
            height = self.height,
            ops = self.ops.len(),
            mime_type,
            "Canvas composited"
        );

        let mut out = Vec::new();
        match format {
            ImageFormat::Jpeg => {
                let rgb = DynamicImage::ImageRgba8(surface).to_rgb8();
                JpegEncoder::new_with_quality(&mut out, self.quality).encode_image(&rgb)?;
            }
            _ => {
                DynamicImage::ImageRgba8(surface).write_to(&mut Cursor::new(&mut out), format)?;
            }
        }
        Ok(Bytes::from(out))
    }
}
