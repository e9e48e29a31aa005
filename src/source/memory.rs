//! In-memory image source.
//!
//! [`InMemoryImageServer`] is the leaf source used by the CLI (wrapping a
//! decoded image file) and by tests. It synthesizes a resolution pyramid by
//! nearest-neighbour sampling of the full-resolution planes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use tracing::trace;

use crate::error::TransformError;
use crate::region::RegionRequest;

use super::buffer::PixelBuffer;
use super::metadata::{ImageChannel, ImageServerMetadata, ResolutionLevel};
use super::server::ImageServer;

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// Leaf image server backed by full-resolution buffers, one per (z, t) plane.
#[derive(Debug)]
pub struct InMemoryImageServer {
    metadata: ImageServerMetadata,
    /// Planes ordered `z + t * size_z`
    planes: Arc<Vec<PixelBuffer>>,
    instance: u64,
}

impl InMemoryImageServer {
    /// Wrap a single-plane buffer.
    ///
    /// 3-channel `Uint8` buffers are reported as RGB; everything else gets
    /// generic channel names.
    pub fn new(name: impl Into<String>, buffer: PixelBuffer) -> Self {
        let is_rgb = buffer.channel_count() == 3 && buffer.pixel_type() == super::PixelType::Uint8;
        let channels = if is_rgb {
            ImageChannel::rgb()
        } else {
            ImageChannel::default_channels(buffer.channel_count())
        };
        let metadata = ImageServerMetadata::new(
            name,
            buffer.width(),
            buffer.height(),
            channels,
            buffer.pixel_type(),
        )
        .with_rgb(is_rgb);

        Self::from_parts(metadata, vec![buffer])
    }

    /// Wrap a decoded image.
    pub fn from_image(name: impl Into<String>, image: &DynamicImage) -> Self {
        Self::new(name, PixelBuffer::from_dynamic_image(image))
    }

    /// Wrap a stack of planes.
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleSource` if the planes disagree on size, channel
    /// count or pixel type, or if their number is not `size_z * size_t`.
    pub fn with_planes(
        name: impl Into<String>,
        planes: Vec<PixelBuffer>,
        size_z: u32,
        size_t: u32,
    ) -> Result<Self, TransformError> {
        let first = planes
            .first()
            .ok_or_else(|| TransformError::incompatible("at least one plane is required"))?;

        if planes.len() != (size_z * size_t) as usize {
            return Err(TransformError::incompatible(format!(
                "expected {} planes for {} z-slices and {} timepoints, got {}",
                size_z * size_t,
                size_z,
                size_t,
                planes.len()
            )));
        }

        let mismatched = planes.iter().any(|p| {
            p.width() != first.width()
                || p.height() != first.height()
                || p.channel_count() != first.channel_count()
                || p.pixel_type() != first.pixel_type()
        });
        if mismatched {
            return Err(TransformError::incompatible(
                "all planes must share dimensions, channel count and pixel type",
            ));
        }

        let mut server = Self::new(name, first.clone());
        server.metadata.size_z = size_z;
        server.metadata.size_t = size_t;
        server.planes = Arc::new(planes);
        Ok(server)
    }

    fn from_parts(metadata: ImageServerMetadata, planes: Vec<PixelBuffer>) -> Self {
        let mut server = Self {
            metadata,
            planes: Arc::new(planes),
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
        };
        server.metadata.levels = default_pyramid(
            server.metadata.width,
            server.metadata.height,
            server.metadata.tile_width.max(server.metadata.tile_height),
        );
        server
    }

    /// Replace the synthesized pyramid with explicit downsample factors.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` unless the first factor is 1.0 and every
    /// factor is finite and at least 1.
    pub fn with_downsamples(mut self, downsamples: &[f64]) -> Result<Self, TransformError> {
        if downsamples.first() != Some(&1.0) {
            return Err(TransformError::invalid_parameter(
                "the first downsample must be 1.0",
            ));
        }
        if downsamples.iter().any(|d| !d.is_finite() || *d < 1.0) {
            return Err(TransformError::invalid_parameter(
                "downsamples must be finite and at least 1.0",
            ));
        }
        self.metadata.levels = downsamples
            .iter()
            .map(|&d| ResolutionLevel::scaled(self.metadata.width, self.metadata.height, d))
            .collect();
        Ok(self)
    }

    /// Override the preferred tile size.
    pub fn with_tile_size(mut self, tile_width: u32, tile_height: u32) -> Self {
        self.metadata.tile_width = tile_width.max(1);
        self.metadata.tile_height = tile_height.max(1);
        self
    }

    /// Override the channel names and colors.
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleSource` if the channel count differs from the data.
    pub fn with_channels(mut self, channels: Vec<ImageChannel>) -> Result<Self, TransformError> {
        if channels.len() != self.metadata.channel_count() {
            return Err(TransformError::incompatible(format!(
                "{} channel names supplied for {} channels",
                channels.len(),
                self.metadata.channel_count()
            )));
        }
        self.metadata.channels = channels;
        Ok(self)
    }
}

/// Downsample by powers of two until a level fits within one tile.
fn default_pyramid(width: u32, height: u32, tile_size: u32) -> Vec<ResolutionLevel> {
    let mut levels = vec![ResolutionLevel::scaled(width, height, 1.0)];
    let mut downsample = 1.0;
    loop {
        let last = levels[levels.len() - 1];
        if last.width.max(last.height) <= tile_size || last.width.min(last.height) <= 1 {
            break;
        }
        downsample *= 2.0;
        levels.push(ResolutionLevel::scaled(width, height, downsample));
    }
    levels
}

#[async_trait]
impl ImageServer for InMemoryImageServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        format!("memory:{}#{}", self.metadata.name, self.instance)
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        let downsample = self.validate_request(request)?;
        let region = request.region;
        let plane = &self.planes[(region.z + region.t * self.metadata.size_z) as usize];
        let (out_w, out_h) = request.output_size(downsample);

        trace!(
            server = %self.metadata.name,
            x = region.x,
            y = region.y,
            width = region.width,
            height = region.height,
            level = request.level,
            "reading in-memory region"
        );

        let n_channels = plane.channel_count();
        let mut out = PixelBuffer::zeros(out_w, out_h, n_channels, plane.pixel_type());
        let (w, h) = (plane.width() as i64, plane.height() as i64);

        for j in 0..out_h {
            let sy = (region.y as f64 + (j as f64 + 0.5) * downsample).floor() as i64;
            if sy < 0 || sy >= h {
                continue;
            }
            for i in 0..out_w {
                let sx = (region.x as f64 + (i as f64 + 0.5) * downsample).floor() as i64;
                if sx < 0 || sx >= w {
                    continue;
                }
                for c in 0..n_channels {
                    out.set(i, j, c, plane.get(sx as u32, sy as u32, c));
                }
            }
        }

        Ok(out)
    }
}
