//! Stain normalization by deconvolution and reconvolution.

use serde::{Deserialize, Serialize};

use crate::color::ColorDeconvolutionStains;
use crate::error::TransformError;
use crate::source::{ImageServerMetadata, PixelBuffer, PixelType};

use super::{Normalizer, PixelNormalizer};

/// Re-renders an RGB image with a different set of stain colors.
///
/// Each pixel is deconvolved with `stains_in`, stain `k` is multiplied by
/// `scales[k]` (1.0 leaves it unchanged, 0.0 suppresses it) and the result is
/// reconvolved with `stains_out`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StainNormalizer {
    pub stains_in: ColorDeconvolutionStains,
    pub stains_out: ColorDeconvolutionStains,
    #[serde(default)]
    pub scales: Vec<f64>,
}

impl StainNormalizer {
    /// Create a normalizer, checking that both stain sets are invertible.
    ///
    /// `scales` may be empty (all 1.0), a single value for every stain, or
    /// one value per stain.
    pub fn new(
        stains_in: ColorDeconvolutionStains,
        stains_out: ColorDeconvolutionStains,
        scales: &[f64],
    ) -> Result<Self, TransformError> {
        let normalizer = Self {
            stains_in,
            stains_out,
            scales: scales.to_vec(),
        };
        normalizer.check_parameters()?;
        Ok(normalizer)
    }

    fn check_parameters(&self) -> Result<(), TransformError> {
        if !matches!(self.scales.len(), 0 | 1 | 3) {
            return Err(TransformError::invalid_parameter(format!(
                "stain normalization takes 0, 1 or 3 scales, got {}",
                self.scales.len()
            )));
        }
        if self.scales.iter().any(|s| !s.is_finite()) {
            return Err(TransformError::invalid_parameter("scales must be finite"));
        }
        self.stains_in.matrix()?;
        self.stains_out.matrix()?;
        Ok(())
    }

    fn scale(&self, stain: usize) -> f64 {
        match self.scales.len() {
            0 => 1.0,
            1 => self.scales[0],
            _ => self.scales[stain],
        }
    }
}

impl PixelNormalizer for StainNormalizer {
    fn type_name(&self) -> &str {
        "StainNormalize"
    }

    fn validate(&self, input: &ImageServerMetadata) -> Result<(), TransformError> {
        if !input.is_rgb_uint8() {
            return Err(TransformError::unsupported(format!(
                "stain normalization requires 8-bit RGB, got {} {:?} channels",
                input.channel_count(),
                input.pixel_type
            )));
        }
        self.check_parameters()
    }

    fn output_metadata(&self, input: &ImageServerMetadata) -> ImageServerMetadata {
        input.clone()
    }

    fn apply(&self, buffer: PixelBuffer) -> Result<PixelBuffer, TransformError> {
        if buffer.pixel_type() != PixelType::Uint8 || buffer.channel_count() != 3 {
            return Err(TransformError::unsupported(format!(
                "stain normalization received {} {:?} channels",
                buffer.channel_count(),
                buffer.pixel_type()
            )));
        }

        let input = self.stains_in.matrix()?;
        let output = self.stains_out.matrix()?;
        let scales = [self.scale(0), self.scale(1), self.scale(2)];

        let (width, height) = (buffer.width(), buffer.height());
        let mut out = PixelBuffer::zeros(width, height, 3, PixelType::Uint8);
        let [r, g, b] = [buffer.channel(0), buffer.channel(1), buffer.channel(2)];

        for y in 0..height {
            for x in 0..width {
                let i = (y * width + x) as usize;
                let mut c = input.deconvolve([r[i], g[i], b[i]]);
                for k in 0..3 {
                    c[k] *= scales[k];
                }
                let rgb = output.reconvolve(c);
                for (k, v) in rgb.iter().enumerate() {
                    out.set(x, y, k, v.round().clamp(0.0, 255.0) as f32);
                }
            }
        }

        Ok(out)
    }

    fn to_json(&self) -> Result<serde_json::Value, TransformError> {
        Ok(serde_json::to_value(Normalizer::StainNormalize(self.clone()))?)
    }
}
