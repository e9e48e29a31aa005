//! Rotation by multiples of 90 degrees.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransformError;
use crate::region::{ImageRegion, RegionRequest};
use crate::source::{ImageServer, ImageServerMetadata, PixelBuffer, SharedServer};

use super::{derive_id, StageSpec};

/// Clockwise rotation in 90 degree steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    #[serde(rename = "ROTATE_NONE")]
    None,
    #[serde(rename = "ROTATE_90")]
    Cw90,
    #[serde(rename = "ROTATE_180")]
    Cw180,
    #[serde(rename = "ROTATE_270")]
    Cw270,
}

impl Rotation {
    /// Rotation for a clockwise angle in degrees.
    ///
    /// Returns `None` unless the angle is a multiple of 90.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Cw90),
            180 => Some(Rotation::Cw180),
            270 => Some(Rotation::Cw270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            Rotation::None => 0,
            Rotation::Cw90 => 90,
            Rotation::Cw180 => 180,
            Rotation::Cw270 => 270,
        }
    }

    /// Whether width and height swap.
    pub fn swaps_axes(&self) -> bool {
        matches!(self, Rotation::Cw90 | Rotation::Cw270)
    }
}

/// Stage rotating its upstream clockwise.
#[derive(Debug)]
pub struct RotatedImageServer {
    server: SharedServer,
    rotation: Rotation,
    metadata: ImageServerMetadata,
    id: String,
}

impl RotatedImageServer {
    pub fn new(server: SharedServer, rotation: Rotation) -> Self {
        let upstream = server.metadata();
        let mut metadata = upstream.clone();
        if rotation.swaps_axes() {
            metadata = metadata.with_dimensions(upstream.height, upstream.width);
            std::mem::swap(&mut metadata.tile_width, &mut metadata.tile_height);
        }
        let id = derive_id(&[&server], &StageSpec::Rotate { rotation });

        debug!(upstream = %upstream.name, degrees = rotation.degrees(), "created rotation stage");

        Self {
            server,
            rotation,
            metadata,
            id,
        }
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    /// Upstream rectangle holding the pixels of a rotated-space rectangle.
    fn source_region(&self, region: &ImageRegion) -> ImageRegion {
        let w = self.server.width() as i64;
        let h = self.server.height() as i64;
        let (rw, rh) = (region.width as i64, region.height as i64);
        let (x, y, width, height) = match self.rotation {
            Rotation::None => (region.x, region.y, region.width, region.height),
            Rotation::Cw90 => (region.y, flip(h, region.x, rw), region.height, region.width),
            Rotation::Cw180 => (
                flip(w, region.x, rw),
                flip(h, region.y, rh),
                region.width,
                region.height,
            ),
            Rotation::Cw270 => (flip(w, region.y, rh), region.x, region.height, region.width),
        };
        ImageRegion {
            x,
            y,
            width,
            height,
            z: region.z,
            t: region.t,
        }
    }
}

/// Start of the span `[start, start + len)` mirrored within `[0, extent)`.
fn flip(extent: i64, start: i64, len: i64) -> i64 {
    extent.saturating_sub(start).saturating_sub(len)
}

#[async_trait]
impl ImageServer for RotatedImageServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        let downsample = self.validate_request(request)?;
        let source = self.source_region(&request.region);
        let fetched = self.server.read_region(&request.with_region(source)).await?;

        if self.rotation == Rotation::None {
            return Ok(fetched);
        }

        let (out_w, out_h) = request.output_size(downsample);
        let (sw, sh) = (fetched.width(), fetched.height());
        let n_channels = fetched.channel_count();
        let mut out = PixelBuffer::zeros(out_w, out_h, n_channels, fetched.pixel_type());

        if sw == 0 || sh == 0 {
            return Ok(out);
        }

        for j in 0..out_h {
            for i in 0..out_w {
                let (sx, sy) = match self.rotation {
                    Rotation::Cw90 => (j, sh.saturating_sub(1 + i)),
                    Rotation::Cw180 => (sw.saturating_sub(1 + i), sh.saturating_sub(1 + j)),
                    Rotation::Cw270 => (sw.saturating_sub(1 + j), i),
                    Rotation::None => (i, j),
                };
                if sx >= sw || sy >= sh {
                    continue;
                }
                for c in 0..n_channels {
                    out.set(i, j, c, fetched.get(sx, sy, c));
                }
            }
        }

        Ok(out)
    }

    fn wrapped(&self) -> Option<&SharedServer> {
        Some(&self.server)
    }

    fn stage(&self) -> Option<StageSpec> {
        Some(StageSpec::Rotate {
            rotation: self.rotation,
        })
    }
}
