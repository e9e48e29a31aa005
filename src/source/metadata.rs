//! Image server metadata.
//!
//! Every stage in a transform pipeline reports an [`ImageServerMetadata`]
//! that is fully determined by its upstream metadata and its construction
//! parameters. Metadata is a plain value snapshot that can be queried
//! without any I/O.

use serde::{Deserialize, Serialize};

/// Default tile edge length for sources that do not specify one.
pub const DEFAULT_TILE_SIZE: u32 = 256;

// =============================================================================
// Pixel Type
// =============================================================================

/// Sample type of every channel in an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PixelType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
}

impl PixelType {
    pub const fn bits_per_sample(&self) -> u32 {
        match self {
            PixelType::Uint8 | PixelType::Int8 => 8,
            PixelType::Uint16 | PixelType::Int16 => 16,
            PixelType::Uint32 | PixelType::Int32 | PixelType::Float32 => 32,
            PixelType::Float64 => 64,
        }
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, PixelType::Float32 | PixelType::Float64)
    }

    pub const fn is_signed(&self) -> bool {
        !matches!(
            self,
            PixelType::Uint8 | PixelType::Uint16 | PixelType::Uint32
        )
    }

    /// Smallest representable sample value.
    pub fn min_value(&self) -> f64 {
        match self {
            PixelType::Uint8 | PixelType::Uint16 | PixelType::Uint32 => 0.0,
            PixelType::Int8 => i8::MIN as f64,
            PixelType::Int16 => i16::MIN as f64,
            PixelType::Int32 => i32::MIN as f64,
            PixelType::Float32 => f32::MIN as f64,
            PixelType::Float64 => f64::MIN,
        }
    }

    /// Largest representable sample value.
    pub fn max_value(&self) -> f64 {
        match self {
            PixelType::Uint8 => u8::MAX as f64,
            PixelType::Int8 => i8::MAX as f64,
            PixelType::Uint16 => u16::MAX as f64,
            PixelType::Int16 => i16::MAX as f64,
            PixelType::Uint32 => u32::MAX as f64,
            PixelType::Int32 => i32::MAX as f64,
            PixelType::Float32 => f32::MAX as f64,
            PixelType::Float64 => f64::MAX,
        }
    }

    /// Round and clamp a sample into this type's range.
    ///
    /// Float types pass values through unchanged.
    pub fn clamp(&self, value: f32) -> f32 {
        if self.is_float() {
            return value;
        }
        let v = (value as f64).round();
        v.clamp(self.min_value(), self.max_value()) as f32
    }
}

// =============================================================================
// Channels
// =============================================================================

/// A named image channel with a display color (packed `0xRRGGBB`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageChannel {
    pub name: String,
    pub color: u32,
}

impl ImageChannel {
    pub fn new(name: impl Into<String>, color: u32) -> Self {
        Self {
            name: name.into(),
            color,
        }
    }

    /// The standard red, green and blue channels of a brightfield image.
    pub fn rgb() -> Vec<ImageChannel> {
        vec![
            ImageChannel::new("Red", 0xFF0000),
            ImageChannel::new("Green", 0x00FF00),
            ImageChannel::new("Blue", 0x0000FF),
        ]
    }

    /// Generic channels named `Channel 1..=n`.
    pub fn default_channels(n: usize) -> Vec<ImageChannel> {
        const PALETTE: [u32; 6] = [0xFF0000, 0x00FF00, 0x0000FF, 0xFFFF00, 0x00FFFF, 0xFF00FF];
        (0..n)
            .map(|i| ImageChannel::new(format!("Channel {}", i + 1), PALETTE[i % PALETTE.len()]))
            .collect()
    }
}

// =============================================================================
// Resolution Levels
// =============================================================================

/// One level of a resolution pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionLevel {
    /// Downsample factor relative to level 0
    pub downsample: f64,

    /// Width of this level in pixels
    pub width: u32,

    /// Height of this level in pixels
    pub height: u32,
}

impl ResolutionLevel {
    /// Level of a `width x height` full-resolution image at `downsample`.
    pub fn scaled(width: u32, height: u32, downsample: f64) -> Self {
        Self {
            downsample,
            width: crate::region::scaled_len(width, downsample),
            height: crate::region::scaled_len(height, downsample),
        }
    }

    /// Rebuild a pyramid for new full-resolution dimensions, keeping downsamples.
    pub fn rescale_all(levels: &[ResolutionLevel], width: u32, height: u32) -> Vec<Self> {
        levels
            .iter()
            .map(|l| ResolutionLevel::scaled(width, height, l.downsample))
            .collect()
    }
}

// =============================================================================
// ImageServerMetadata
// =============================================================================

/// Complete description of an image server's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageServerMetadata {
    /// Human-readable name
    pub name: String,

    /// Full-resolution width in pixels
    pub width: u32,

    /// Full-resolution height in pixels
    pub height: u32,

    /// Number of z-slices
    pub size_z: u32,

    /// Number of timepoints
    pub size_t: u32,

    /// Channels in output order
    pub channels: Vec<ImageChannel>,

    /// Sample type shared by every channel
    pub pixel_type: PixelType,

    /// Whether the image is packed 8-bit RGB
    pub is_rgb: bool,

    /// Preferred tile width
    pub tile_width: u32,

    /// Preferred tile height
    pub tile_height: u32,

    /// Resolution pyramid, level 0 first
    pub levels: Vec<ResolutionLevel>,
}

impl ImageServerMetadata {
    /// Metadata for a single-plane image with a full-resolution level only.
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        channels: Vec<ImageChannel>,
        pixel_type: PixelType,
    ) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            size_z: 1,
            size_t: 1,
            channels,
            pixel_type,
            is_rgb: false,
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
            levels: vec![ResolutionLevel {
                downsample: 1.0,
                width,
                height,
            }],
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name.clone()).collect()
    }

    /// Index of the first channel with the given name.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> Option<&ResolutionLevel> {
        self.levels.get(level)
    }

    /// Number of tiles `(tiles_x, tiles_y)` covering a level.
    pub fn tiles_for_level(&self, level: usize) -> Option<(u32, u32)> {
        let info = self.levels.get(level)?;
        if self.tile_width == 0 || self.tile_height == 0 {
            return None;
        }
        Some((
            info.width.div_ceil(self.tile_width),
            info.height.div_ceil(self.tile_height),
        ))
    }

    /// Whether the output is 3-channel 8-bit RGB.
    pub fn is_rgb_uint8(&self) -> bool {
        self.is_rgb && self.pixel_type == PixelType::Uint8 && self.channels.len() == 3
    }

    /// Same metadata with new full-resolution dimensions; pyramid downsamples are kept.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.levels = ResolutionLevel::rescale_all(&self.levels, width, height);
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_channels(mut self, channels: Vec<ImageChannel>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    pub fn with_rgb(mut self, is_rgb: bool) -> Self {
        self.is_rgb = is_rgb;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}
