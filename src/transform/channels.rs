//! Channel extraction and projection stage.

use async_trait::async_trait;
use tracing::debug;

use crate::color::{ColorTransform, ResolvedTransform};
use crate::error::TransformError;
use crate::region::RegionRequest;
use crate::source::{
    ImageChannel, ImageServer, ImageServerMetadata, PixelBuffer, PixelType, SharedServer,
};

use super::{derive_id, StageSpec};

/// Stage computing one output channel per [`ColorTransform`].
///
/// When every transform is a plain extraction the upstream pixel type is
/// kept; any projection makes the output `Float32`.
#[derive(Debug)]
pub struct ChannelTransformServer {
    server: SharedServer,
    transforms: Vec<ColorTransform>,
    resolved: Vec<ResolvedTransform>,
    metadata: ImageServerMetadata,
    id: String,
}

impl ChannelTransformServer {
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an empty transform list and
    /// `ChannelNotFound` if a transform names a missing channel.
    pub fn new(
        server: SharedServer,
        transforms: Vec<ColorTransform>,
    ) -> Result<Self, TransformError> {
        if transforms.is_empty() {
            return Err(TransformError::invalid_parameter(
                "at least one channel transform is required",
            ));
        }

        let upstream = server.metadata();
        let resolved = transforms
            .iter()
            .map(|t| t.resolve(upstream))
            .collect::<Result<Vec<_>, _>>()?;

        let pixel_type = if transforms.iter().all(ColorTransform::is_extraction) {
            upstream.pixel_type
        } else {
            PixelType::Float32
        };
        let channels = resolved
            .iter()
            .map(|r| ImageChannel::new(r.name(), r.color()))
            .collect();
        let metadata = upstream
            .clone()
            .with_channels(channels)
            .with_pixel_type(pixel_type)
            .with_rgb(false);
        let id = derive_id(
            &[&server],
            &StageSpec::ChannelTransform {
                transforms: transforms.clone(),
            },
        );

        debug!(
            upstream = %upstream.name,
            channels = ?metadata.channel_names(),
            "created channel transform stage"
        );

        Ok(Self {
            server,
            transforms,
            resolved,
            metadata,
            id,
        })
    }

    pub fn transforms(&self) -> &[ColorTransform] {
        &self.transforms
    }
}

#[async_trait]
impl ImageServer for ChannelTransformServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        self.validate_request(request)?;
        let fetched = self.server.read_region(request).await?;
        let expected = self.server.channel_count();
        if fetched.channel_count() != expected {
            return Err(TransformError::incompatible(format!(
                "channel transform expected {} upstream channels, received {}",
                expected,
                fetched.channel_count()
            )));
        }

        let (width, height) = (fetched.width(), fetched.height());

        // Extraction-only: copy planes without visiting pixels
        if self.resolved.iter().all(|r| r.source_channel().is_some()) {
            let channels = self
                .resolved
                .iter()
                .filter_map(ResolvedTransform::source_channel)
                .map(|c| fetched.channel(c).to_vec())
                .collect();
            return PixelBuffer::new(width, height, self.metadata.pixel_type, channels)
                .ok_or_else(|| TransformError::incompatible("extracted channel length mismatch"));
        }

        let mut out = PixelBuffer::zeros(
            width,
            height,
            self.resolved.len(),
            self.metadata.pixel_type,
        );
        let mut pixel = vec![0.0f32; expected];
        for y in 0..height {
            for x in 0..width {
                for (c, value) in pixel.iter_mut().enumerate() {
                    *value = fetched.get(x, y, c);
                }
                for (k, transform) in self.resolved.iter().enumerate() {
                    out.set(x, y, k, transform.apply(&pixel));
                }
            }
        }
        Ok(out)
    }

    fn wrapped(&self) -> Option<&SharedServer> {
        Some(&self.server)
    }

    fn stage(&self) -> Option<StageSpec> {
        Some(StageSpec::ChannelTransform {
            transforms: self.transforms.clone(),
        })
    }
}
