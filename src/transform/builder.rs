//! Fluent construction of transform pipelines.

use std::sync::Arc;

use tracing::warn;

use crate::color::{ColorDeconvolutionStains, ColorTransform};
use crate::error::TransformError;
use crate::normalize::{OffsetScaleNormalizer, SharedNormalizer, StainNormalizer};
use crate::region::ImageRegion;
use crate::source::SharedServer;

use super::{
    AffineTransform, AffineTransformServer, ChannelTransformServer, ColorDeconvolutionServer,
    ConcatChannelsServer, CroppedImageServer, NormalizedImageServer, RearrangeRgbServer,
    RotatedImageServer, Rotation,
};

/// Builds a chain of transform stages over a base server.
///
/// Each call wraps the current server in one more stage. Fallible calls
/// leave the builder unchanged when they fail, so a pipeline can keep being
/// built after a rejected step.
///
/// # Example
///
/// ```ignore
/// let server = TransformedServerBuilder::new(base)
///     .crop(ImageRegion::new(0, 0, 1024, 1024))?
///     .rotate(Rotation::Cw90)
///     .extract_channels(&[0, 2])?
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TransformedServerBuilder {
    server: SharedServer,
}

impl TransformedServerBuilder {
    pub fn new(server: SharedServer) -> Self {
        Self { server }
    }

    /// The server built so far.
    pub fn build(&self) -> SharedServer {
        self.server.clone()
    }

    fn push(&mut self, server: impl crate::source::ImageServer + 'static) -> &mut Self {
        self.server = Arc::new(server);
        self
    }

    fn push_checked<S>(&mut self, stage: Result<S, TransformError>) -> Result<&mut Self, TransformError>
    where
        S: crate::source::ImageServer + 'static,
    {
        match stage {
            Ok(server) => Ok(self.push(server)),
            Err(err) => {
                warn!(error = %err, "rejected pipeline stage");
                Err(err)
            }
        }
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    pub fn crop(&mut self, region: ImageRegion) -> Result<&mut Self, TransformError> {
        let stage = CroppedImageServer::new(self.build(), region);
        self.push_checked(stage)
    }

    pub fn transform(&mut self, transform: AffineTransform) -> Result<&mut Self, TransformError> {
        let stage = AffineTransformServer::new(self.build(), transform);
        self.push_checked(stage)
    }

    pub fn rotate(&mut self, rotation: Rotation) -> &mut Self {
        let stage = RotatedImageServer::new(self.build(), rotation);
        self.push(stage)
    }

    // =========================================================================
    // Color
    // =========================================================================

    /// Deconvolve into the given 1-based stains; empty means all
    /// non-residual stains.
    pub fn deconvolve_stains(
        &mut self,
        stains: ColorDeconvolutionStains,
        stain_numbers: &[usize],
    ) -> Result<&mut Self, TransformError> {
        let stage = ColorDeconvolutionServer::new(self.build(), stains, stain_numbers);
        self.push_checked(stage)
    }

    /// Rearrange RGB channels; `"BGR"` swaps red and blue.
    pub fn reorder_rgb(&mut self, order: &str) -> Result<&mut Self, TransformError> {
        let stage = RearrangeRgbServer::new(self.build(), order);
        self.push_checked(stage)
    }

    // =========================================================================
    // Channels
    // =========================================================================

    /// One output channel per transform.
    pub fn channel_transforms(
        &mut self,
        transforms: Vec<ColorTransform>,
    ) -> Result<&mut Self, TransformError> {
        let stage = ChannelTransformServer::new(self.build(), transforms);
        self.push_checked(stage)
    }

    pub fn extract_channels(&mut self, indices: &[usize]) -> Result<&mut Self, TransformError> {
        self.channel_transforms(indices.iter().map(|&i| ColorTransform::channel(i)).collect())
    }

    pub fn extract_channels_by_name(&mut self, names: &[&str]) -> Result<&mut Self, TransformError> {
        self.channel_transforms(names.iter().map(|&n| ColorTransform::channel_named(n)).collect())
    }

    pub fn max_channel_project(&mut self) -> Result<&mut Self, TransformError> {
        self.channel_transforms(vec![ColorTransform::MaxProjection])
    }

    pub fn average_channel_project(&mut self) -> Result<&mut Self, TransformError> {
        self.channel_transforms(vec![ColorTransform::MeanProjection])
    }

    pub fn min_channel_project(&mut self) -> Result<&mut Self, TransformError> {
        self.channel_transforms(vec![ColorTransform::MinProjection])
    }

    /// Concatenate channels from `sources`.
    ///
    /// The current server is prepended unless it is already one of
    /// `sources`, in which case it keeps its position.
    pub fn concat_channels(
        &mut self,
        sources: Vec<SharedServer>,
    ) -> Result<&mut Self, TransformError> {
        let stage = ConcatChannelsServer::new(self.build(), sources);
        self.push_checked(stage)
    }

    // =========================================================================
    // Normalization
    // =========================================================================

    pub fn subtract_offset(&mut self, offsets: &[f64]) -> Result<&mut Self, TransformError> {
        self.normalize(Arc::new(OffsetScaleNormalizer::subtract_offset(offsets)))
    }

    pub fn subtract_offset_and_clip_zero(
        &mut self,
        offsets: &[f64],
    ) -> Result<&mut Self, TransformError> {
        self.normalize(Arc::new(OffsetScaleNormalizer::subtract_offset_and_clip_zero(
            offsets,
        )))
    }

    pub fn subtract_offset_and_scale(
        &mut self,
        offsets: &[f64],
        scales: &[f64],
    ) -> Result<&mut Self, TransformError> {
        self.normalize(Arc::new(OffsetScaleNormalizer::offset_and_scale(
            offsets, scales,
        )))
    }

    pub fn scale_channels(&mut self, scales: &[f64]) -> Result<&mut Self, TransformError> {
        self.normalize(Arc::new(OffsetScaleNormalizer::scale(scales)))
    }

    /// Deconvolve with `stains_in` and reconvolve with `stains_out`,
    /// optionally scaling each stain's concentration first.
    pub fn stain_normalize(
        &mut self,
        stains_in: ColorDeconvolutionStains,
        stains_out: ColorDeconvolutionStains,
        scales: &[f64],
    ) -> Result<&mut Self, TransformError> {
        let normalizer = StainNormalizer::new(stains_in, stains_out, scales)?;
        self.normalize(Arc::new(normalizer))
    }

    pub fn normalize(&mut self, normalizer: SharedNormalizer) -> Result<&mut Self, TransformError> {
        let stage = NormalizedImageServer::new(self.build(), normalizer);
        self.push_checked(stage)
    }
}
