//! Tiled image source abstraction.
//!
//! This module defines the interface every image source and every transform
//! stage implements, together with the value types that flow through it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │      Consumer (tile service, CLI)       │
//! └────────────────────┬────────────────────┘
//!                      │ read_region(request)
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │         Transform stage (outer)         │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │         Transform stage (inner)         │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │   Leaf source (InMemoryImageServer,     │
//! │   or any external ImageServer impl)     │
//! └─────────────────────────────────────────┘
//! ```

mod buffer;
mod memory;
mod metadata;
mod server;

pub use buffer::PixelBuffer;
pub use memory::InMemoryImageServer;
pub use metadata::{
    ImageChannel, ImageServerMetadata, PixelType, ResolutionLevel, DEFAULT_TILE_SIZE,
};
pub use server::{base_server, same_server, ImageServer, SharedServer};
