//! Cropping stage.

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::TransformError;
use crate::region::{ImageRegion, RegionRequest};
use crate::source::{ImageServer, ImageServerMetadata, PixelBuffer, SharedServer};

use super::{derive_id, StageSpec};

/// Stage exposing a rectangular sub-image of its upstream.
///
/// Output coordinate `(0, 0)` is the crop's top-left corner. The crop's
/// plane fields are ignored; requests keep their own z and t.
#[derive(Debug)]
pub struct CroppedImageServer {
    server: SharedServer,
    region: ImageRegion,
    metadata: ImageServerMetadata,
    id: String,
}

impl CroppedImageServer {
    /// Crop `region`, clipped to the upstream bounds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if the region does not overlap the image.
    pub fn new(server: SharedServer, region: ImageRegion) -> Result<Self, TransformError> {
        let upstream = server.metadata();
        let bounds = ImageRegion::new(0, 0, upstream.width, upstream.height);
        let clipped = ImageRegion::new(region.x, region.y, region.width, region.height)
            .intersection(&bounds)
            .ok_or_else(|| {
                TransformError::invalid_parameter(format!(
                    "crop {:?} does not overlap the {} x {} image",
                    region, upstream.width, upstream.height
                ))
            })?;

        let metadata = upstream
            .clone()
            .with_dimensions(clipped.width, clipped.height);
        let id = derive_id(&[&server], &StageSpec::Crop { region: clipped });

        debug!(upstream = %upstream.name, region = ?clipped, "created crop stage");

        Ok(Self {
            server,
            region: clipped,
            metadata,
            id,
        })
    }

    /// The crop rectangle in upstream coordinates.
    pub fn region(&self) -> &ImageRegion {
        &self.region
    }
}

#[async_trait]
impl ImageServer for CroppedImageServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        let downsample = self.validate_request(request)?;
        let region = request.region;
        let bounds = ImageRegion::new(0, 0, self.metadata.width, self.metadata.height)
            .on_plane(region.z, region.t);

        let Some(inside) = region.intersection(&bounds) else {
            trace!(?region, "request outside crop");
            return Ok(PixelBuffer::empty(
                self.metadata.channel_count(),
                self.metadata.pixel_type,
            ));
        };

        let upstream_request =
            request.with_region(inside.translate(self.region.x, self.region.y));
        let fetched = self.server.read_region(&upstream_request).await?;
        if inside == region {
            return Ok(fetched);
        }

        // Partial overlap: pad to the requested size
        let (out_w, out_h) = request.output_size(downsample);
        let mut out = PixelBuffer::zeros(
            out_w,
            out_h,
            fetched.channel_count(),
            fetched.pixel_type(),
        );
        let dx = (inside.x.abs_diff(region.x) as f64 / downsample).round() as i64;
        let dy = (inside.y.abs_diff(region.y) as f64 / downsample).round() as i64;
        out.paste(&fetched, dx, dy);
        Ok(out)
    }

    fn wrapped(&self) -> Option<&SharedServer> {
        Some(&self.server)
    }

    fn stage(&self) -> Option<StageSpec> {
        Some(StageSpec::Crop {
            region: self.region,
        })
    }
}
