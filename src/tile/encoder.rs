//! Tile encoder.
//!
//! Converts pipeline output into an 8-bit display image and encodes it as
//! JPEG or PNG.
//!
//! # Display Conversion
//!
//! - **3-channel `Uint8`**: written as RGB unchanged.
//! - **1-channel `Uint8`**: written as grayscale unchanged.
//! - **Anything else**: the first channel is rescaled linearly from its
//!   minimum and maximum within the tile to 0..255. Constant tiles become
//!   black.

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::error::TileError;
use crate::source::{PixelBuffer, PixelType};

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Tile Format
// =============================================================================

/// Output encoding of a tile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileFormat {
    #[default]
    Jpeg,
    Png,
}

impl TileFormat {
    /// File extension without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Jpeg => "jpg",
            TileFormat::Png => "png",
        }
    }

    /// Format for a file extension, case-insensitive.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(TileFormat::Jpeg),
            "png" => Some(TileFormat::Png),
            _ => None,
        }
    }
}

// =============================================================================
// Encoder
// =============================================================================

/// Encodes pixel buffers for display.
#[derive(Debug, Clone, Default)]
pub struct TileEncoder {}

impl TileEncoder {
    pub fn new() -> Self {
        Self {}
    }

    /// Encode a buffer in the given format.
    ///
    /// `quality` only applies to JPEG and is clamped to 1-100.
    ///
    /// # Errors
    ///
    /// Returns `EncodeError` for empty buffers or if the codec fails.
    pub fn encode(
        &self,
        buffer: &PixelBuffer,
        format: TileFormat,
        quality: u8,
    ) -> Result<Bytes, TileError> {
        let image = to_display_image(buffer)?;
        let mut output = Vec::new();

        let result = match format {
            TileFormat::Jpeg => image.write_with_encoder(JpegEncoder::new_with_quality(
                &mut output,
                clamp_quality(quality),
            )),
            TileFormat::Png => image.write_with_encoder(PngEncoder::new(&mut output)),
        };
        result.map_err(|e| TileError::EncodeError {
            message: e.to_string(),
        })?;

        Ok(Bytes::from(output))
    }
}

/// Convert a buffer to an 8-bit image suitable for display.
///
/// # Errors
///
/// Returns `EncodeError` if the buffer has no pixels or no channels.
pub fn to_display_image(buffer: &PixelBuffer) -> Result<DynamicImage, TileError> {
    if buffer.is_empty() || buffer.channel_count() == 0 {
        return Err(TileError::EncodeError {
            message: format!(
                "cannot encode a {}x{} buffer with {} channels",
                buffer.width(),
                buffer.height(),
                buffer.channel_count()
            ),
        });
    }

    if buffer.pixel_type() == PixelType::Uint8 && buffer.channel_count() == 3 {
        if let Some(rgb) = buffer.to_rgb_image() {
            return Ok(DynamicImage::ImageRgb8(rgb));
        }
    }

    let samples = buffer.channel(0);
    let bytes: Vec<u8> = if buffer.pixel_type() == PixelType::Uint8 {
        samples.iter().map(|&v| v.round().clamp(0.0, 255.0) as u8).collect()
    } else {
        let finite = samples.iter().copied().filter(|v| v.is_finite());
        let (min, max) = finite.fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v), hi.max(v))
        });
        let range = max - min;
        samples
            .iter()
            .map(|&v| {
                if !v.is_finite() || !(range > 0.0) {
                    0
                } else {
                    ((v - min) / range * 255.0).round().clamp(0.0, 255.0) as u8
                }
            })
            .collect()
    };

    GrayImage::from_raw(buffer.width(), buffer.height(), bytes)
        .map(DynamicImage::ImageLuma8)
        .ok_or_else(|| TileError::EncodeError {
            message: "display buffer size mismatch".to_string(),
        })
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
///
/// Returns `true` if quality is in the valid range (1-100).
#[inline]
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp quality to valid range.
#[inline]
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================
