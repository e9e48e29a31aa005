//! Configuration management for the wsi-transform CLI.
//!
//! This module provides:
//! - Command-line arguments via clap subcommands
//! - Environment variables with `WSI_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use wsi_transform::config::{Cli, Command};
//!
//! match Cli::parse().into_command() {
//!     Command::Render(config) => println!("rendering {}", config.input.display()),
//!     Command::Inspect(config) => println!("inspecting {}", config.input.display()),
//!     Command::Tiles(config) => println!("tiling into {}", config.output_dir.display()),
//! }
//! ```
//!
//! # Environment Variables
//!
//! - `WSI_PIPELINE` - Pipeline JSON applied to the input image
//! - `WSI_JPEG_QUALITY` - JPEG quality (default: 80)
//! - `WSI_TILE_SIZE` - Tile size override for the input image
//! - `WSI_CACHE_TILES` - Tile cache capacity in bytes (default: 64MB)

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::region::ImageRegion;
use crate::tile::{is_valid_quality, TileFormat, DEFAULT_JPEG_QUALITY, DEFAULT_TILE_CACHE_CAPACITY};

/// Largest accepted tile size override.
pub const MAX_TILE_SIZE: u32 = 8192;

// =============================================================================
// CLI
// =============================================================================

/// wsi-transform - Lazy transform pipelines over tiled images.
///
/// Applies a persisted transform pipeline (crop, rotation, stain
/// deconvolution, channel operations, normalization) to an image and
/// renders regions or tiles of the result.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-transform")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Render one region of the pipeline output to an image file.
    Render(RenderConfig),

    /// Print pipeline metadata and its normalized JSON description.
    Inspect(InspectConfig),

    /// Render every tile of one level into a directory.
    Tiles(TilesConfig),
}

/// Output encoding selectable on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl From<OutputFormat> for TileFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Jpeg => TileFormat::Jpeg,
            OutputFormat::Png => TileFormat::Png,
        }
    }
}

// =============================================================================
// Shared Source Arguments
// =============================================================================

/// Input image and the pipeline applied to it.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Input image (any format the image crate decodes: PNG, JPEG).
    pub input: PathBuf,

    /// Pipeline JSON file. Without it the input is used unchanged.
    #[arg(short, long, env = "WSI_PIPELINE")]
    pub pipeline: Option<PathBuf>,

    /// Tile size of the input image; also bounds its synthesized pyramid.
    #[arg(long, env = "WSI_TILE_SIZE")]
    pub tile_size: Option<u32>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl SourceArgs {
    pub fn validate(&self) -> Result<(), String> {
        if self.input.as_os_str().is_empty() {
            return Err("An input image is required".to_string());
        }
        if let Some(size) = self.tile_size {
            if size == 0 || size > MAX_TILE_SIZE {
                return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Render Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct RenderConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output image path; the extension selects JPEG or PNG.
    #[arg(short, long)]
    pub output: PathBuf,

    /// Region as `x,y,width,height` in full-resolution pixels of the
    /// pipeline output. Defaults to the whole image.
    #[arg(long)]
    pub region: Option<String>,

    /// Resolution level to read.
    #[arg(long, default_value_t = 0)]
    pub level: usize,

    /// Z-slice to read.
    #[arg(long, default_value_t = 0)]
    pub z: u32,

    /// Timepoint to read.
    #[arg(long, default_value_t = 0)]
    pub t: u32,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_JPEG_QUALITY")]
    pub quality: u8,
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.source.validate()?;
        if !is_valid_quality(self.quality) {
            return Err("quality must be between 1 and 100".to_string());
        }
        self.output_format()?;
        self.parse_region()?;
        Ok(())
    }

    /// Format implied by the output file extension.
    pub fn output_format(&self) -> Result<TileFormat, String> {
        format_for_path(&self.output)
    }

    /// The requested region, if any.
    pub fn parse_region(&self) -> Result<Option<ImageRegion>, String> {
        self.region.as_deref().map(parse_region).transpose()
    }
}

fn format_for_path(path: &Path) -> Result<TileFormat, String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(TileFormat::from_extension)
        .ok_or_else(|| {
            format!(
                "Cannot infer output format from '{}': use a .jpg, .jpeg or .png extension",
                path.display()
            )
        })
}

/// Parse `x,y,width,height`.
pub fn parse_region(value: &str) -> Result<ImageRegion, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 4 {
        return Err(format!(
            "Invalid region '{}': expected x,y,width,height",
            value
        ));
    }

    let coord = |s: &str| {
        s.parse::<i64>()
            .map_err(|_| format!("Invalid region coordinate '{}'", s))
    };
    let size = |s: &str| {
        s.parse::<u32>()
            .ok()
            .filter(|v| *v > 0)
            .ok_or_else(|| format!("Invalid region size '{}': must be a positive integer", s))
    };

    Ok(ImageRegion::new(
        coord(parts[0])?,
        coord(parts[1])?,
        size(parts[2])?,
        size(parts[3])?,
    ))
}

// =============================================================================
// Inspect Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InspectConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Print metadata as JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl InspectConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.source.validate()
    }
}

// =============================================================================
// Tiles Command
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct TilesConfig {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Directory that receives `<level>_<x>_<y>.<ext>` files.
    #[arg(short, long)]
    pub output_dir: PathBuf,

    /// Resolution level to tile.
    #[arg(long, default_value_t = 0)]
    pub level: usize,

    /// Tile encoding.
    #[arg(long, value_enum, default_value_t = OutputFormat::Jpeg)]
    pub format: OutputFormat,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_JPEG_QUALITY")]
    pub quality: u8,

    /// Tile cache capacity in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "WSI_CACHE_TILES")]
    pub cache_tiles: usize,
}

impl TilesConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.source.validate()?;
        if !is_valid_quality(self.quality) {
            return Err("quality must be between 1 and 100".to_string());
        }
        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Output path of one tile.
    pub fn tile_path(&self, tile_x: u32, tile_y: u32) -> PathBuf {
        let format: TileFormat = self.format.into();
        self.output_dir.join(format!(
            "{}_{}_{}.{}",
            self.level,
            tile_x,
            tile_y,
            format.extension()
        ))
    }
}

// =============================================================================
// Tests
// =============================================================================
