//! Tile rendering layer.
//!
//! Serves a transform pipeline through fixed-size tiles, the access
//! pattern viewers use.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           CLI / viewer client           │
//! └────────────────────┬────────────────────┘
//!                      │ TileRequest
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              Tile Service               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │   TileEncoder   │  │
//! │  │  (encoded    │  │  (display →     │  │
//! │  │   tiles)     │  │   JPEG / PNG)   │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ read_region
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │        Transform pipeline server        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileService`]: validates requests, renders through the pipeline, caches
//! - [`TileCache`]: LRU cache for encoded tiles with size-based eviction
//! - [`TileCacheKey`]: server id plus every request field
//! - [`TileEncoder`]: pixel buffer to 8-bit JPEG or PNG

mod cache;
mod encoder;
mod service;

pub use cache::{TileCache, TileCacheKey, DEFAULT_TILE_CACHE_CAPACITY};
pub use encoder::{
    clamp_quality, is_valid_quality, to_display_image, TileEncoder, TileFormat,
    DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use service::{TileRequest, TileResponse, TileService};
