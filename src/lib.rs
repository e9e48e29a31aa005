//! # wsi-transform
//!
//! Lazy, composable transform pipelines over tiled multi-resolution images.
//!
//! A pipeline is a chain of decorator stages, each implementing the same
//! [`ImageServer`] interface as the image it wraps. Nothing is computed up
//! front: every `read_region` call maps the requested region back through
//! the chain, reads the base image once, and transforms the pixels on the
//! way out.
//!
//! ## Features
//!
//! - **Geometry**: crop, affine transform, rotation by multiples of 90°
//! - **Color**: stain deconvolution, RGB reordering, stain normalization
//! - **Channels**: extraction by index or name, min/mean/max projection,
//!   concatenation across sources
//! - **Normalization**: offset/scale per channel, pluggable custom normalizers
//! - **Persistence**: pipelines serialize to tagged JSON and rebuild over a
//!   base image
//! - **Tiles**: cached JPEG/PNG tile rendering of any pipeline
//!
//! ## Architecture
//!
//! - [`region`] - Region and request coordinates
//! - [`source`] - The `ImageServer` trait, metadata, pixel buffers, in-memory source
//! - [`color`] - Color transforms and stain vectors
//! - [`normalize`] - Pixel normalizers and their registry
//! - [`transform`] - Decorator stages, builder and persisted pipelines
//! - [`tile`] - Tile service, cache and encoding
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_transform::{
//!     ImageRegion, ImageServer, InMemoryImageServer, RegionRequest, Rotation,
//!     SharedServer, TransformedServerBuilder,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let image = image::open("slide.png")?;
//! let base: SharedServer = Arc::new(InMemoryImageServer::from_image("slide", &image));
//!
//! let server = TransformedServerBuilder::new(base)
//!     .crop(ImageRegion::new(0, 0, 512, 512))?
//!     .rotate(Rotation::Cw90)
//!     .average_channel_project()?
//!     .build();
//!
//! let pixels = server
//!     .read_region(&RegionRequest::new(ImageRegion::new(0, 0, 256, 256), 0))
//!     .await?;
//! # let _ = pixels;
//! # Ok(())
//! # }
//! ```

pub mod color;
pub mod config;
pub mod error;
pub mod normalize;
pub mod region;
pub mod source;
pub mod tile;
pub mod transform;

// Re-export commonly used types
pub use color::{ColorDeconvolutionStains, ColorTransform, StainVector};
pub use config::{Cli, Command, InspectConfig, RenderConfig, TilesConfig};
pub use error::{IoError, TileError, TransformError};
pub use normalize::{
    Normalizer, NormalizerRegistry, OffsetScaleNormalizer, PixelNormalizer, SharedNormalizer,
    StainNormalizer,
};
pub use region::{scaled_len, ImageRegion, RegionRequest};
pub use source::{
    base_server, same_server, ImageChannel, ImageServer, ImageServerMetadata,
    InMemoryImageServer, PixelBuffer, PixelType, ResolutionLevel, SharedServer,
};
pub use tile::{
    TileCache, TileCacheKey, TileEncoder, TileFormat, TileRequest, TileResponse, TileService,
    DEFAULT_JPEG_QUALITY, DEFAULT_TILE_CACHE_CAPACITY,
};
pub use transform::{
    AffineTransform, AffineTransformServer, ChannelTransformServer, ColorDeconvolutionServer,
    ConcatChannelsServer, CroppedImageServer, NormalizedImageServer, PipelineSpec,
    RearrangeRgbServer, RotatedImageServer, Rotation, StageSpec, TransformedServerBuilder,
};
