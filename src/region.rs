//! Pixel-space regions and region requests.
//!
//! All regions are expressed in full-resolution (level 0) pixel coordinates.
//! A [`RegionRequest`] pairs a region with a resolution level; the buffer
//! returned for it is scaled by that level's downsample factor.

use serde::{Deserialize, Serialize};

// =============================================================================
// ImageRegion
// =============================================================================

/// Axis-aligned rectangle on a single (z, t) plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRegion {
    /// Left edge in full-resolution pixels (may be negative)
    pub x: i64,

    /// Top edge in full-resolution pixels (may be negative)
    pub y: i64,

    /// Width in full-resolution pixels
    pub width: u32,

    /// Height in full-resolution pixels
    pub height: u32,

    /// Z-slice index
    #[serde(default)]
    pub z: u32,

    /// Timepoint index
    #[serde(default)]
    pub t: u32,
}

impl ImageRegion {
    /// Create a region on the default plane (z = 0, t = 0).
    pub const fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            z: 0,
            t: 0,
        }
    }

    /// Return the same rectangle on another plane.
    pub const fn on_plane(self, z: u32, t: u32) -> Self {
        Self { z, t, ..self }
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge, saturating at `i64::MAX`.
    pub const fn max_x(&self) -> i64 {
        self.x.saturating_add(self.width as i64)
    }

    /// Exclusive bottom edge, saturating at `i64::MAX`.
    pub const fn max_y(&self) -> i64 {
        self.y.saturating_add(self.height as i64)
    }

    pub const fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x && y >= self.y && x < self.max_x() && y < self.max_y()
    }

    /// Intersection of the two rectangles, keeping this region's plane.
    ///
    /// Returns `None` if the rectangles do not overlap.
    pub fn intersection(&self, other: &ImageRegion) -> Option<ImageRegion> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());

        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        Some(ImageRegion {
            x: x0,
            y: y0,
            width: x1.abs_diff(x0) as u32,
            height: y1.abs_diff(y0) as u32,
            z: self.z,
            t: self.t,
        })
    }

    pub fn intersects(&self, other: &ImageRegion) -> bool {
        self.intersection(other).is_some()
    }

    /// Shift the region by `(dx, dy)`, saturating at the `i64` range.
    pub const fn translate(self, dx: i64, dy: i64) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..self
        }
    }
}

// =============================================================================
// RegionRequest
// =============================================================================

/// A request for the pixels of a region at one resolution level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionRequest {
    /// Region in full-resolution coordinates
    pub region: ImageRegion,

    /// Resolution level (0 = full resolution)
    pub level: usize,
}

impl RegionRequest {
    pub const fn new(region: ImageRegion, level: usize) -> Self {
        Self { region, level }
    }

    /// Request at full resolution.
    pub const fn full_resolution(region: ImageRegion) -> Self {
        Self { region, level: 0 }
    }

    /// Same level and plane, different rectangle.
    pub const fn with_region(self, region: ImageRegion) -> Self {
        Self { region, ..self }
    }

    /// Output buffer size `(width, height)` at the given downsample factor.
    pub fn output_size(&self, downsample: f64) -> (u32, u32) {
        (
            scaled_len(self.region.width, downsample),
            scaled_len(self.region.height, downsample),
        )
    }
}

/// Number of output pixels covering `len` full-resolution pixels at `downsample`.
///
/// Zero stays zero; anything else is rounded and never drops below one pixel.
pub fn scaled_len(len: u32, downsample: f64) -> u32 {
    if len == 0 {
        return 0;
    }
    let scaled = (len as f64 / downsample).round();
    (scaled as u32).max(1)
}
