//! Affine transformation stage.
//!
//! The output image is the upstream image mapped through an
//! [`AffineTransform`] and shifted so that the transformed bounding box
//! starts at `(0, 0)`. A mirror, rotation or negative translation therefore
//! keeps all of its content.
//!
//! Reads resample with nearest-neighbour interpolation: every output pixel
//! center is mapped through the inverse transform and takes the value of the
//! upstream pixel containing it. Centers that land outside the upstream
//! image produce zeros.

use async_trait::async_trait;
use nalgebra::{Matrix2, Matrix3};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::TransformError;
use crate::region::{ImageRegion, RegionRequest};
use crate::source::{ImageServer, ImageServerMetadata, PixelBuffer, SharedServer};

use super::{derive_id, StageSpec};

/// Below this absolute determinant a matrix is treated as singular.
const MIN_DETERMINANT: f64 = 1e-12;

/// Tolerance for floating-point noise when rounding transformed bounds.
const BOUNDS_EPSILON: f64 = 1e-6;

// =============================================================================
// AffineTransform
// =============================================================================

/// 2D affine map `x' = m00·x + m01·y + m02`, `y' = m10·x + m11·y + m12`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub m00: f64,
    pub m10: f64,
    pub m01: f64,
    pub m11: f64,
    pub m02: f64,
    pub m12: f64,
}

impl AffineTransform {
    pub const fn new(m00: f64, m10: f64, m01: f64, m11: f64, m02: f64, m12: f64) -> Self {
        Self {
            m00,
            m10,
            m01,
            m11,
            m02,
            m12,
        }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    pub const fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub const fn scale(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Rotation by `theta` radians about the origin.
    pub fn rotation(theta: f64) -> Self {
        let (sin, cos) = theta.sin_cos();
        Self::new(cos, sin, -sin, cos, 0.0, 0.0)
    }

    /// Homogeneous 3x3 form, with the translation in the last column.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        #[rustfmt::skip]
        let m = Matrix3::new(
            self.m00, self.m01, self.m02,
            self.m10, self.m11, self.m12,
            0.0, 0.0, 1.0,
        );
        m
    }

    /// Read the affine part of a homogeneous matrix; the last row is ignored.
    pub fn from_matrix(m: &Matrix3<f64>) -> Self {
        Self::new(m[(0, 0)], m[(1, 0)], m[(0, 1)], m[(1, 1)], m[(0, 2)], m[(1, 2)])
    }

    pub fn determinant(&self) -> f64 {
        Matrix2::new(self.m00, self.m01, self.m10, self.m11).determinant()
    }

    pub fn is_finite(&self) -> bool {
        [self.m00, self.m10, self.m01, self.m11, self.m02, self.m12]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn is_invertible(&self) -> bool {
        self.is_finite() && self.determinant().abs() >= MIN_DETERMINANT
    }

    /// # Errors
    ///
    /// Returns `InvalidTransform` if the matrix is singular or non-finite.
    pub fn inverse(&self) -> Result<Self, TransformError> {
        if !self.is_finite() {
            return Err(TransformError::InvalidTransform {
                message: format!("matrix has non-finite coefficients: {:?}", self),
            });
        }
        let det = self.determinant();
        if det.abs() < MIN_DETERMINANT {
            return Err(TransformError::InvalidTransform {
                message: format!("matrix is not invertible (determinant {})", det),
            });
        }

        self.to_matrix()
            .try_inverse()
            .map(|m| Self::from_matrix(&m))
            .ok_or_else(|| TransformError::InvalidTransform {
                message: format!("matrix is not invertible (determinant {})", det),
            })
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.m00 * x + self.m01 * y + self.m02,
            self.m10 * x + self.m11 * y + self.m12,
        )
    }

    /// The transform that applies `self` first and then `next`.
    pub fn then(&self, next: &AffineTransform) -> Self {
        Self::from_matrix(&(next.to_matrix() * self.to_matrix()))
    }

    /// Bounding box `(min_x, min_y, max_x, max_y)` of a transformed rectangle.
    pub fn transform_bounds(&self, x: f64, y: f64, width: f64, height: f64) -> (f64, f64, f64, f64) {
        let corners = [
            self.apply(x, y),
            self.apply(x + width, y),
            self.apply(x, y + height),
            self.apply(x + width, y + height),
        ];
        corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), &(cx, cy)| (x0.min(cx), y0.min(cy), x1.max(cx), y1.max(cy)),
        )
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

// =============================================================================
// AffineTransformServer
// =============================================================================

/// Stage presenting its upstream through an affine transform.
#[derive(Debug)]
pub struct AffineTransformServer {
    server: SharedServer,
    transform: AffineTransform,
    /// Upstream pixels to output pixels: `transform` followed by the shift
    /// moving the transformed bounding box to the origin
    placement: AffineTransform,
    inverse: AffineTransform,
    metadata: ImageServerMetadata,
    id: String,
}

impl AffineTransformServer {
    /// # Errors
    ///
    /// Returns `InvalidTransform` if `transform` cannot be inverted, or if the
    /// transformed image is too large to address.
    pub fn new(server: SharedServer, transform: AffineTransform) -> Result<Self, TransformError> {
        transform.inverse()?;
        let upstream = server.metadata();

        let (min_x, min_y, max_x, max_y) =
            transform.transform_bounds(0.0, 0.0, upstream.width as f64, upstream.height as f64);
        let origin_x = (min_x + BOUNDS_EPSILON).floor();
        let origin_y = (min_y + BOUNDS_EPSILON).floor();
        let width = (max_x - BOUNDS_EPSILON).ceil() - origin_x;
        let height = (max_y - BOUNDS_EPSILON).ceil() - origin_y;
        if !(1.0..=u32::MAX as f64).contains(&width) || !(1.0..=u32::MAX as f64).contains(&height)
        {
            return Err(TransformError::InvalidTransform {
                message: format!(
                    "transformed image has unusable extent {} x {}",
                    width, height
                ),
            });
        }

        let placement = transform.then(&AffineTransform::translation(-origin_x, -origin_y));
        let inverse = placement.inverse()?;
        let metadata = upstream.clone().with_dimensions(width as u32, height as u32);
        let id = derive_id(&[&server], &StageSpec::AffineTransform { transform });

        debug!(
            upstream = %upstream.name,
            width = metadata.width,
            height = metadata.height,
            origin_x,
            origin_y,
            ?transform,
            "created affine transform stage"
        );

        Ok(Self {
            server,
            transform,
            placement,
            inverse,
            metadata,
            id,
        })
    }

    pub fn transform(&self) -> &AffineTransform {
        &self.transform
    }

    /// Map from upstream pixel coordinates to this stage's pixel coordinates.
    pub fn placement(&self) -> &AffineTransform {
        &self.placement
    }

    /// Upstream region covering the inverse-mapped request at `downsample`.
    ///
    /// The region starts on the sampling grid of the request: the upstream
    /// samples its pixels at `x + (i + 0.5) * downsample`, and the start is
    /// chosen so those centers coincide with the inverse-mapped output
    /// centers. `None` if nothing upstream contributes.
    fn source_region(&self, region: &ImageRegion, downsample: f64) -> Option<ImageRegion> {
        let (x0, y0, x1, y1) = self.inverse.transform_bounds(
            region.x as f64,
            region.y as f64,
            region.width as f64,
            region.height as f64,
        );
        let upstream = self.server.metadata();
        let (src_w, src_h) = (upstream.width as f64, upstream.height as f64);
        let (x0, y0) = (x0.max(0.0), y0.max(0.0));
        let (x1, y1) = (x1.min(src_w), y1.min(src_h));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let (cx, cy) = self.inverse.apply(
            region.x as f64 + 0.5 * downsample,
            region.y as f64 + 0.5 * downsample,
        );
        let x = grid_start(cx - 0.5 * downsample, x0, downsample);
        let y = grid_start(cy - 0.5 * downsample, y0, downsample);
        let width = ((x1 + downsample).ceil() as i64 - x).max(0) as u32;
        let height = ((y1 + downsample).ceil() as i64 - y).max(0) as u32;

        Some(ImageRegion {
            x,
            y,
            width,
            height,
            z: region.z,
            t: region.t,
        })
    }
}

/// Last position below `min` on the grid through `phase` with spacing
/// `step`, rounded to a whole pixel.
fn grid_start(phase: f64, min: f64, step: f64) -> i64 {
    let steps = ((phase - min) / step).floor() + 1.0;
    (phase - steps * step).round() as i64
}

#[async_trait]
impl ImageServer for AffineTransformServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        let downsample = self.validate_request(request)?;
        let region = request.region;
        let (out_w, out_h) = request.output_size(downsample);
        let mut out = PixelBuffer::zeros(
            out_w,
            out_h,
            self.metadata.channel_count(),
            self.metadata.pixel_type,
        );

        let Some(source) = self.source_region(&region, downsample) else {
            return Ok(out);
        };

        trace!(?region, ?source, level = request.level, "affine read");

        let fetched = self
            .server
            .read_region(&request.with_region(source))
            .await?;
        if fetched.is_empty() {
            return Ok(out);
        }

        let upstream = self.server.metadata();
        let (src_w, src_h) = (upstream.width as f64, upstream.height as f64);
        let n_channels = out.channel_count().min(fetched.channel_count());
        let max_bx = fetched.width() as i64 - 1;
        let max_by = fetched.height() as i64 - 1;
        let (sx, sy) = (source.x as f64, source.y as f64);

        for j in 0..out_h {
            let py = region.y as f64 + (j as f64 + 0.5) * downsample;
            for i in 0..out_w {
                let px = region.x as f64 + (i as f64 + 0.5) * downsample;
                let (qx, qy) = self.inverse.apply(px, py);
                if qx < 0.0 || qy < 0.0 || qx >= src_w || qy >= src_h {
                    continue;
                }
                // Fetched pixel b covers [s + b * d, s + (b + 1) * d)
                let bx = (((qx - sx) / downsample).floor() as i64).clamp(0, max_bx);
                let by = (((qy - sy) / downsample).floor() as i64).clamp(0, max_by);
                for c in 0..n_channels {
                    out.set(i, j, c, fetched.get(bx as u32, by as u32, c));
                }
            }
        }

        Ok(out)
    }

    fn wrapped(&self) -> Option<&SharedServer> {
        Some(&self.server)
    }

    fn stage(&self) -> Option<StageSpec> {
        Some(StageSpec::AffineTransform {
            transform: self.transform,
        })
    }
}
