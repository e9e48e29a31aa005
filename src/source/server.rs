//! ImageServer trait for region-based access to tiled images.
//!
//! Every leaf source and every transform stage implements [`ImageServer`].
//! A transform stage wraps one (or, for channel concatenation, several)
//! upstream servers and presents the same interface, so stages compose
//! into arbitrarily long chains.
//!
//! # Contract
//!
//! `read_region` must return a buffer whose dimensions are exactly
//! `request.output_size(downsample)` for the requested level, with
//! `metadata().channel_count()` channels. Pixels outside the image are
//! zero-filled. The only exception is a cropped server asked for a region
//! that lies entirely outside its crop, which returns an empty buffer.
//!
//! Implementations must not mutate shared state while reading: a server is
//! shared behind an `Arc` and queried concurrently.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransformError;
use crate::region::RegionRequest;
use crate::transform::StageSpec;

use super::buffer::PixelBuffer;
use super::metadata::{ImageServerMetadata, PixelType, ResolutionLevel};

/// Shared handle to any image server.
pub type SharedServer = Arc<dyn ImageServer>;

/// Region-addressable, multi-resolution image source.
#[async_trait]
pub trait ImageServer: Send + Sync + fmt::Debug {
    /// Metadata describing this server's output.
    fn metadata(&self) -> &ImageServerMetadata;

    /// Identifier that changes whenever the server's output would change.
    ///
    /// Transform stages derive it from their upstream id and their
    /// construction parameters.
    fn id(&self) -> String;

    /// Read the pixels of a region at a resolution level.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The level does not exist
    /// - The upstream source fails to read (propagated unchanged)
    /// - A stage cannot process the pixels it receives
    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError>;

    /// The upstream server a transform stage wraps; `None` for leaf sources.
    fn wrapped(&self) -> Option<&SharedServer> {
        None
    }

    /// The construction parameters of a transform stage; `None` for leaf sources.
    fn stage(&self) -> Option<StageSpec> {
        None
    }

    fn width(&self) -> u32 {
        self.metadata().width
    }

    fn height(&self) -> u32 {
        self.metadata().height
    }

    fn channel_count(&self) -> usize {
        self.metadata().channel_count()
    }

    fn channel_names(&self) -> Vec<String> {
        self.metadata().channel_names()
    }

    fn pixel_type(&self) -> PixelType {
        self.metadata().pixel_type
    }

    fn level_count(&self) -> usize {
        self.metadata().level_count()
    }

    fn levels(&self) -> &[ResolutionLevel] {
        &self.metadata().levels
    }

    /// Check that a request targets an existing level and plane.
    ///
    /// Returns the level's downsample factor.
    fn validate_request(&self, request: &RegionRequest) -> Result<f64, TransformError> {
        let meta = self.metadata();
        let level = meta
            .level(request.level)
            .ok_or(TransformError::InvalidLevel {
                level: request.level,
                level_count: meta.level_count(),
            })?;

        if request.region.z >= meta.size_z || request.region.t >= meta.size_t {
            return Err(TransformError::invalid_parameter(format!(
                "plane (z={}, t={}) outside image with {} z-slices and {} timepoints",
                request.region.z, request.region.t, meta.size_z, meta.size_t
            )));
        }

        Ok(level.downsample)
    }
}

/// Whether two handles point at the same server instance.
///
/// Compares data pointers only, so two handles to one server created through
/// different trait-object coercions still compare equal.
pub fn same_server(a: &SharedServer, b: &SharedServer) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Walk `wrapped()` links down to the leaf source.
pub fn base_server(server: &SharedServer) -> &SharedServer {
    let mut current = server;
    while let Some(inner) = current.wrapped() {
        current = inner;
    }
    current
}
