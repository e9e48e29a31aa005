//! Tile service for rendering pipeline output.
//!
//! The TileService turns tile coordinates into encoded images:
//! - Request validation
//! - Cache lookups
//! - Region reads through the pipeline
//! - Display conversion and encoding
//! - Result caching
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TileService                             │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                    get_tile()                           │    │
//! │  │  1. Validate params   3. read_region on the pipeline    │    │
//! │  │  2. Check cache       4. Encode, cache & return         │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │           │                    │                    │           │
//! │           ▼                    ▼                    ▼           │
//! │    ┌───────────┐      ┌──────────────┐    ┌──────────────────┐  │
//! │    │ TileCache │      │ SharedServer │    │   TileEncoder    │  │
//! │    └───────────┘      └──────────────┘    └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use tracing::{debug, instrument};

use crate::error::TileError;
use crate::region::{ImageRegion, RegionRequest};
use crate::source::SharedServer;

use super::cache::{TileCache, TileCacheKey};
use super::encoder::{is_valid_quality, TileEncoder, TileFormat, DEFAULT_JPEG_QUALITY};

// =============================================================================
// Tile Request
// =============================================================================

/// A request for one tile of the served image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    /// Pyramid level (0 = full resolution)
    pub level: usize,

    /// Tile column at that level
    pub tile_x: u32,

    /// Tile row at that level
    pub tile_y: u32,

    /// Z-slice
    pub z: u32,

    /// Timepoint
    pub t: u32,

    /// JPEG quality (1-100, defaults to 80)
    pub quality: u8,

    pub format: TileFormat,
}

impl TileRequest {
    /// A JPEG tile request on the first plane at the default quality.
    pub fn new(level: usize, tile_x: u32, tile_y: u32) -> Self {
        Self {
            level,
            tile_x,
            tile_y,
            z: 0,
            t: 0,
            quality: DEFAULT_JPEG_QUALITY,
            format: TileFormat::Jpeg,
        }
    }

    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_format(mut self, format: TileFormat) -> Self {
        self.format = format;
        self
    }

    pub fn on_plane(mut self, z: u32, t: u32) -> Self {
        self.z = z;
        self.t = t;
        self
    }
}

// =============================================================================
// Tile Response
// =============================================================================

/// Response from the tile service.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// The encoded tile
    pub data: Bytes,

    /// Whether this tile was served from cache
    pub cache_hit: bool,

    pub format: TileFormat,
}

// =============================================================================
// Tile Service
// =============================================================================

/// Renders and caches tiles of one pipeline.
///
/// # Example
///
/// ```ignore
/// use wsi_transform::tile::{TileRequest, TileService};
///
/// let service = TileService::new(pipeline);
/// let response = service.get_tile(TileRequest::new(0, 1, 2)).await?;
/// println!("{} bytes, cache hit: {}", response.data.len(), response.cache_hit);
/// ```
pub struct TileService {
    server: SharedServer,
    cache: TileCache,
    encoder: TileEncoder,
}

impl TileService {
    /// A service with the default cache capacity.
    pub fn new(server: SharedServer) -> Self {
        Self::with_cache_capacity(server, super::DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// # Arguments
    ///
    /// * `server` - The pipeline to render
    /// * `cache_capacity` - Maximum tile cache size in bytes
    pub fn with_cache_capacity(server: SharedServer, cache_capacity: usize) -> Self {
        Self {
            server,
            cache: TileCache::with_capacity(cache_capacity),
            encoder: TileEncoder::new(),
        }
    }

    pub fn server(&self) -> &SharedServer {
        &self.server
    }

    /// Get a tile, using the cache when possible.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The quality is outside 1-100
    /// - The level is out of range
    /// - The tile coordinates are out of bounds
    /// - The pipeline fails to read the region
    /// - The tile cannot be encoded
    #[instrument(skip(self), fields(server = %self.server.metadata().name))]
    pub async fn get_tile(&self, request: TileRequest) -> Result<TileResponse, TileError> {
        if !is_valid_quality(request.quality) {
            return Err(TileError::InvalidQuality {
                quality: request.quality,
            });
        }

        let key = TileCacheKey::new(self.server.id(), &request);
        if let Some(data) = self.cache.get(&key).await {
            return Ok(TileResponse {
                data,
                cache_hit: true,
                format: request.format,
            });
        }

        let data = self.render_tile(&request).await?;
        self.cache.put(key, data.clone()).await;

        Ok(TileResponse {
            data,
            cache_hit: false,
            format: request.format,
        })
    }

    /// Render a tile without touching the cache.
    pub async fn render_tile(&self, request: &TileRequest) -> Result<Bytes, TileError> {
        let region = self.tile_region(request)?;
        debug!(?region, level = request.level, "rendering tile");

        let pixels = self
            .server
            .read_region(&RegionRequest::new(region, request.level))
            .await?;
        self.encoder.encode(&pixels, request.format, request.quality)
    }

    /// Full-resolution region covered by a tile.
    ///
    /// Edge tiles are clipped to the image bounds.
    pub fn tile_region(&self, request: &TileRequest) -> Result<ImageRegion, TileError> {
        let metadata = self.server.metadata();
        let level_count = metadata.level_count();
        let invalid_level = || TileError::InvalidLevel {
            level: request.level,
            max_levels: level_count,
        };

        let level = metadata.level(request.level).ok_or_else(invalid_level)?;
        let (max_x, max_y) = metadata
            .tiles_for_level(request.level)
            .ok_or_else(invalid_level)?;
        if request.tile_x >= max_x || request.tile_y >= max_y {
            return Err(TileError::TileOutOfBounds {
                level: request.level,
                x: request.tile_x,
                y: request.tile_y,
                max_x,
                max_y,
            });
        }

        let ds = level.downsample;
        let to_full = |v: u32, limit: u32| ((v as f64 * ds).round() as i64).min(limit as i64);

        let px0 = request.tile_x * metadata.tile_width;
        let py0 = request.tile_y * metadata.tile_height;
        let px1 = (px0 + metadata.tile_width).min(level.width);
        let py1 = (py0 + metadata.tile_height).min(level.height);

        let x0 = to_full(px0, metadata.width);
        let y0 = to_full(py0, metadata.height);
        let x1 = to_full(px1, metadata.width);
        let y1 = to_full(py1, metadata.height);

        Ok(
            ImageRegion::new(x0, y0, (x1 - x0).max(0) as u32, (y1 - y0).max(0) as u32)
                .on_plane(request.z, request.t),
        )
    }

    /// Render the whole image at the coarsest level whose larger side is
    /// still at least `max_dimension` pixels (or level 0 if none is).
    pub async fn render_overview(
        &self,
        max_dimension: u32,
        format: TileFormat,
        quality: u8,
    ) -> Result<Bytes, TileError> {
        if !is_valid_quality(quality) {
            return Err(TileError::InvalidQuality { quality });
        }

        let metadata = self.server.metadata();
        let level = metadata
            .levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.width.max(l.height) >= max_dimension)
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0);

        let region = ImageRegion::new(0, 0, metadata.width, metadata.height);
        debug!(level, max_dimension, "rendering overview");
        let pixels = self
            .server
            .read_region(&RegionRequest::new(region, level))
            .await?;
        self.encoder.encode(&pixels, format, quality)
    }

    /// Returns `(current_size, capacity, entry_count)`.
    pub async fn cache_stats(&self) -> (usize, usize, usize) {
        (
            self.cache.size().await,
            self.cache.capacity(),
            self.cache.len().await,
        )
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }
}

// =============================================================================
// Tests
// =============================================================================
