//! Normalizing stage.

use async_trait::async_trait;
use tracing::debug;

use crate::error::TransformError;
use crate::normalize::SharedNormalizer;
use crate::region::RegionRequest;
use crate::source::{ImageServer, ImageServerMetadata, PixelBuffer, SharedServer};

use super::{derive_id, StageSpec};

/// Stage applying a [`PixelNormalizer`](crate::normalize::PixelNormalizer)
/// to every buffer its upstream returns.
#[derive(Debug)]
pub struct NormalizedImageServer {
    server: SharedServer,
    normalizer: SharedNormalizer,
    normalizer_json: serde_json::Value,
    metadata: ImageServerMetadata,
    id: String,
}

impl NormalizedImageServer {
    /// # Errors
    ///
    /// Returns the normalizer's validation error if it cannot process the
    /// upstream, or `Serialization` if it cannot describe itself as JSON.
    pub fn new(server: SharedServer, normalizer: SharedNormalizer) -> Result<Self, TransformError> {
        let upstream = server.metadata();
        normalizer.validate(upstream)?;
        let normalizer_json = normalizer.to_json()?;

        let metadata = normalizer.output_metadata(upstream);
        if (metadata.width, metadata.height) != (upstream.width, upstream.height) {
            return Err(TransformError::invalid_parameter(format!(
                "normalizer '{}' changes the image size",
                normalizer.type_name()
            )));
        }

        let id = derive_id(
            &[&server],
            &StageSpec::Normalize {
                normalizer: normalizer_json.clone(),
            },
        );

        debug!(
            upstream = %upstream.name,
            normalizer = normalizer.type_name(),
            "created normalization stage"
        );

        Ok(Self {
            server,
            normalizer,
            normalizer_json,
            metadata,
            id,
        })
    }

    pub fn normalizer(&self) -> &SharedNormalizer {
        &self.normalizer
    }
}

#[async_trait]
impl ImageServer for NormalizedImageServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        self.validate_request(request)?;
        let fetched = self.server.read_region(request).await?;
        let (width, height) = (fetched.width(), fetched.height());

        let normalized = self.normalizer.apply(fetched)?;
        if (normalized.width(), normalized.height()) != (width, height) {
            return Err(TransformError::incompatible(format!(
                "normalizer '{}' returned {}x{} for a {}x{} buffer",
                self.normalizer.type_name(),
                normalized.width(),
                normalized.height(),
                width,
                height
            )));
        }
        Ok(normalized)
    }

    fn wrapped(&self) -> Option<&SharedServer> {
        Some(&self.server)
    }

    fn stage(&self) -> Option<StageSpec> {
        Some(StageSpec::Normalize {
            normalizer: self.normalizer_json.clone(),
        })
    }
}
