//! Test utilities for integration tests.
//!
//! This module provides synthetic image sources and mock servers that track
//! or fail reads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use wsi_transform::{
    ImageChannel, ImageRegion, ImageServer, ImageServerMetadata, InMemoryImageServer, IoError,
    PixelBuffer, PixelType, RegionRequest, SharedServer, TransformError,
};

// =============================================================================
// Synthetic Images
// =============================================================================

/// An 8-bit RGB image where every pixel differs from its neighbours.
pub fn gradient_rgb(width: u32, height: u32) -> PixelBuffer {
    let mut buffer = PixelBuffer::zeros(width, height, 3, PixelType::Uint8);
    for y in 0..height {
        for x in 0..width {
            buffer.set(x, y, 0, ((x * 7 + y * 3) % 256) as f32);
            buffer.set(x, y, 1, ((x * 5 + y * 11) % 256) as f32);
            buffer.set(x, y, 2, ((x + y * 13 + 40) % 256) as f32);
        }
    }
    buffer
}

/// A multi-channel image with value `1000 * c + 10 * y + x`.
pub fn gradient_channels(width: u32, height: u32, channels: usize, pixel_type: PixelType) -> PixelBuffer {
    let mut buffer = PixelBuffer::zeros(width, height, channels, pixel_type);
    for c in 0..channels {
        for y in 0..height {
            for x in 0..width {
                buffer.set(x, y, c, (1000 * c as u32 + 10 * y + x) as f32);
            }
        }
    }
    buffer
}

/// RGB source backed by [`gradient_rgb`].
pub fn rgb_server(name: &str, width: u32, height: u32) -> SharedServer {
    Arc::new(InMemoryImageServer::new(name, gradient_rgb(width, height)))
}

/// Fluorescence-style source with named channels.
pub fn named_server(name: &str, width: u32, height: u32, channel_names: &[&str]) -> SharedServer {
    let buffer = gradient_channels(width, height, channel_names.len(), PixelType::Uint16);
    let channels = channel_names
        .iter()
        .enumerate()
        .map(|(i, n)| ImageChannel::new(*n, 0x00FF00 + i as u32))
        .collect();
    let server = InMemoryImageServer::new(name, buffer)
        .with_channels(channels)
        .unwrap();
    Arc::new(server)
}

/// Read a region at full resolution.
pub async fn read(server: &SharedServer, x: i64, y: i64, width: u32, height: u32) -> PixelBuffer {
    server
        .read_region(&RegionRequest::full_resolution(ImageRegion::new(x, y, width, height)))
        .await
        .unwrap()
}

/// Read the whole image at a level.
pub async fn read_all(server: &SharedServer, level: usize) -> PixelBuffer {
    let region = ImageRegion::new(0, 0, server.width(), server.height());
    server
        .read_region(&RegionRequest::new(region, level))
        .await
        .unwrap()
}

/// Assert two buffers have equal geometry and samples within `tolerance`.
pub fn assert_buffers_close(actual: &PixelBuffer, expected: &PixelBuffer, tolerance: f32) {
    assert_eq!(
        (actual.width(), actual.height(), actual.channel_count()),
        (expected.width(), expected.height(), expected.channel_count()),
        "buffer geometry differs"
    );
    for c in 0..expected.channel_count() {
        for y in 0..expected.height() {
            for x in 0..expected.width() {
                let (a, e) = (actual.get(x, y, c), expected.get(x, y, c));
                assert!(
                    (a - e).abs() <= tolerance,
                    "pixel ({}, {}) channel {}: {} != {}",
                    x,
                    y,
                    c,
                    a,
                    e
                );
            }
        }
    }
}

// =============================================================================
// Counting Server
// =============================================================================

/// Wraps a server and counts `read_region` calls.
#[derive(Debug)]
pub struct CountingServer {
    inner: SharedServer,
    reads: Arc<AtomicUsize>,
}

impl CountingServer {
    pub fn new(inner: SharedServer) -> Self {
        Self {
            inner,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared handle to the read counter.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

#[async_trait]
impl ImageServer for CountingServer {
    fn metadata(&self) -> &ImageServerMetadata {
        self.inner.metadata()
    }

    fn id(&self) -> String {
        format!("counting:{}", self.inner.id())
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_region(request).await
    }
}

// =============================================================================
// Failing Server
// =============================================================================

/// A leaf source whose reads always fail with an I/O error.
#[derive(Debug)]
pub struct FailingServer {
    metadata: ImageServerMetadata,
    error: IoError,
}

impl FailingServer {
    /// An RGB source of the given size failing with `error`.
    pub fn rgb(width: u32, height: u32, error: IoError) -> Self {
        let metadata = ImageServerMetadata::new(
            "failing",
            width,
            height,
            ImageChannel::rgb(),
            PixelType::Uint8,
        )
        .with_rgb(true);
        Self { metadata, error }
    }
}

#[async_trait]
impl ImageServer for FailingServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        "failing".to_string()
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        self.validate_request(request)?;
        Err(self.error.clone().into())
    }
}

// =============================================================================
// Mislabelled Server
// =============================================================================

/// Claims to be 8-bit RGB but returns 16-bit single-channel pixels.
#[derive(Debug)]
pub struct MislabelledServer {
    metadata: ImageServerMetadata,
}

impl MislabelledServer {
    pub fn new(width: u32, height: u32) -> Self {
        let metadata = ImageServerMetadata::new(
            "mislabelled",
            width,
            height,
            ImageChannel::rgb(),
            PixelType::Uint8,
        )
        .with_rgb(true);
        Self { metadata }
    }
}

#[async_trait]
impl ImageServer for MislabelledServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        "mislabelled".to_string()
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        let downsample = self.validate_request(request)?;
        let (width, height) = request.output_size(downsample);
        Ok(PixelBuffer::zeros(width, height, 1, PixelType::Uint16))
    }
}
