//! Per-channel offset subtraction and scaling.

use serde::{Deserialize, Serialize};

use crate::error::TransformError;
use crate::source::{ImageServerMetadata, PixelBuffer, PixelType};

use super::{Normalizer, PixelNormalizer};

/// Computes `(value - offset) * scale` per channel, optionally clipping at zero.
///
/// A single offset or scale applies to every channel; otherwise one value per
/// channel is required. Missing offsets default to 0 and missing scales to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetScaleNormalizer {
    #[serde(default)]
    pub offsets: Vec<f64>,
    #[serde(default)]
    pub scales: Vec<f64>,
    #[serde(default)]
    pub clip_to_zero: bool,
}

impl OffsetScaleNormalizer {
    pub fn new(offsets: Vec<f64>, scales: Vec<f64>, clip_to_zero: bool) -> Self {
        Self {
            offsets,
            scales,
            clip_to_zero,
        }
    }

    pub fn subtract_offset(offsets: &[f64]) -> Self {
        Self::new(offsets.to_vec(), Vec::new(), false)
    }

    pub fn subtract_offset_and_clip_zero(offsets: &[f64]) -> Self {
        Self::new(offsets.to_vec(), Vec::new(), true)
    }

    pub fn offset_and_scale(offsets: &[f64], scales: &[f64]) -> Self {
        Self::new(offsets.to_vec(), scales.to_vec(), false)
    }

    pub fn scale(scales: &[f64]) -> Self {
        Self::new(Vec::new(), scales.to_vec(), false)
    }

    fn value_for(values: &[f64], channel: usize, default: f64) -> f64 {
        match values.len() {
            0 => default,
            1 => values[0],
            _ => values[channel],
        }
    }

    fn check_length(name: &str, values: &[f64], n_channels: usize) -> Result<(), TransformError> {
        if values.len() > 1 && values.len() != n_channels {
            return Err(TransformError::invalid_parameter(format!(
                "{} {} supplied for {} channels",
                values.len(),
                name,
                n_channels
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(TransformError::invalid_parameter(format!(
                "{} must be finite",
                name
            )));
        }
        Ok(())
    }
}

impl PixelNormalizer for OffsetScaleNormalizer {
    fn type_name(&self) -> &str {
        "OffsetScale"
    }

    fn validate(&self, input: &ImageServerMetadata) -> Result<(), TransformError> {
        Self::check_length("offsets", &self.offsets, input.channel_count())?;
        Self::check_length("scales", &self.scales, input.channel_count())
    }

    fn output_metadata(&self, input: &ImageServerMetadata) -> ImageServerMetadata {
        input
            .clone()
            .with_pixel_type(PixelType::Float32)
            .with_rgb(false)
    }

    fn apply(&self, buffer: PixelBuffer) -> Result<PixelBuffer, TransformError> {
        let (width, height) = (buffer.width(), buffer.height());
        Self::check_length("offsets", &self.offsets, buffer.channel_count())?;
        Self::check_length("scales", &self.scales, buffer.channel_count())?;

        let channels = buffer
            .into_channels()
            .into_iter()
            .enumerate()
            .map(|(c, samples)| {
                let offset = Self::value_for(&self.offsets, c, 0.0);
                let scale = Self::value_for(&self.scales, c, 1.0);
                samples
                    .into_iter()
                    .map(|v| {
                        let out = ((v as f64 - offset) * scale) as f32;
                        if self.clip_to_zero {
                            out.max(0.0)
                        } else {
                            out
                        }
                    })
                    .collect()
            })
            .collect();

        PixelBuffer::new(width, height, PixelType::Float32, channels)
            .ok_or_else(|| TransformError::incompatible("normalized channel length mismatch"))
    }

    fn to_json(&self) -> Result<serde_json::Value, TransformError> {
        Ok(serde_json::to_value(Normalizer::OffsetScale(self.clone()))?)
    }
}
