//! wsi-transform - Lazy transform pipelines over tiled images.
//!
//! This binary loads an image, applies a persisted pipeline and renders or
//! describes the result.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_transform::{
    config::{Cli, Command, InspectConfig, RenderConfig, SourceArgs, TilesConfig},
    ImageRegion, InMemoryImageServer, IoError, NormalizerRegistry, PipelineSpec,
    RegionRequest, SharedServer, TileEncoder, TileRequest, TileService,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Render(config) => run_render(config).await,
        Command::Inspect(config) => run_inspect(config),
        Command::Tiles(config) => run_tiles(config).await,
    }
}

// =============================================================================
// Shared Setup
// =============================================================================

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_transform=debug"
    } else {
        "wsi_transform=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Decode the input image and apply the pipeline to it.
fn open_pipeline(args: &SourceArgs) -> Result<SharedServer, String> {
    let image = image::open(&args.input).map_err(|e| {
        let io = match e {
            image::ImageError::IoError(ref err) if err.kind() == std::io::ErrorKind::NotFound => {
                IoError::NotFound(args.input.display().to_string())
            }
            image::ImageError::IoError(err) => IoError::Read(err.to_string()),
            other => IoError::Decode(other.to_string()),
        };
        io.to_string()
    })?;

    let name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let mut base = InMemoryImageServer::from_image(name, &image);
    if let Some(size) = args.tile_size {
        base = base.with_tile_size(size, size);
    }
    let base: SharedServer = Arc::new(base);
    debug!(
        width = base.width(),
        height = base.height(),
        channels = base.channel_count(),
        "loaded input image"
    );

    let Some(ref path) = args.pipeline else {
        return Ok(base);
    };
    let spec = load_spec(path)?;
    spec.build(base, &NormalizerRegistry::with_defaults())
        .map_err(|e| format!("Failed to build pipeline: {}", e))
}

fn load_spec(path: &Path) -> Result<PipelineSpec, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read pipeline '{}': {}", path.display(), e))?;
    PipelineSpec::from_json(&json)
        .map_err(|e| format!("Failed to parse pipeline '{}': {}", path.display(), e))
}

// =============================================================================
// Render Command
// =============================================================================

async fn run_render(config: RenderConfig) -> ExitCode {
    init_logging(config.source.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let server = match open_pipeline(&config.source) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let (format, region) = match (config.output_format(), config.parse_region()) {
        (Ok(format), Ok(region)) => (format, region),
        (Err(e), _) | (_, Err(e)) => {
            error!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let region = region
        .unwrap_or_else(|| ImageRegion::new(0, 0, server.width(), server.height()))
        .on_plane(config.z, config.t);

    info!(?region, level = config.level, "rendering region");
    let pixels = match server
        .read_region(&RegionRequest::new(region, config.level))
        .await
    {
        Ok(pixels) => pixels,
        Err(e) => {
            error!("Failed to read region: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let encoded = match TileEncoder::new().encode(&pixels, format, config.quality) {
        Ok(encoded) => encoded,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::write(&config.output, &encoded) {
        error!("Failed to write '{}': {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    info!(
        "Wrote {}x{} image to {} ({} bytes)",
        pixels.width(),
        pixels.height(),
        config.output.display(),
        encoded.len()
    );
    ExitCode::SUCCESS
}

// =============================================================================
// Inspect Command
// =============================================================================

fn run_inspect(config: InspectConfig) -> ExitCode {
    init_logging(config.source.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let server = match open_pipeline(&config.source) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let spec = match PipelineSpec::describe(&server) {
        Ok(spec) => spec,
        Err(e) => {
            error!("Failed to describe pipeline: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let metadata = server.metadata();
    if config.json {
        let json = serde_json::json!({
            "id": server.id(),
            "metadata": metadata,
            "pipeline": spec,
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Failed to serialize metadata: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    println!("Pipeline Inspection");
    println!("═══════════════════");
    println!();
    println!("Id:          {}", server.id());
    println!("Size:        {} x {}", metadata.width, metadata.height);
    println!("Planes:      z={} t={}", metadata.size_z, metadata.size_t);
    println!("Pixel type:  {:?}", metadata.pixel_type);
    println!("RGB:         {}", metadata.is_rgb);
    println!("Tile size:   {} x {}", metadata.tile_width, metadata.tile_height);
    println!();
    println!("Channels:");
    for (i, channel) in metadata.channels.iter().enumerate() {
        println!("  {:>2}  {:<20} #{:06X}", i, channel.name, channel.color);
    }
    println!();
    println!("Levels:");
    for (i, level) in metadata.levels.iter().enumerate() {
        println!(
            "  {:>2}  {:>8.3}x  {} x {}",
            i, level.downsample, level.width, level.height
        );
    }
    println!();
    println!("Stages:");
    if spec.is_empty() {
        println!("  (none)");
    }
    for (i, stage) in spec.stages.iter().enumerate() {
        println!("  {:>2}  {}", i + 1, stage.kind());
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Tiles Command
// =============================================================================

async fn run_tiles(config: TilesConfig) -> ExitCode {
    init_logging(config.source.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let server = match open_pipeline(&config.source) {
        Ok(server) => server,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let Some((tiles_x, tiles_y)) = server.metadata().tiles_for_level(config.level) else {
        error!(
            "Invalid level {}: image has {} levels",
            config.level,
            server.level_count()
        );
        return ExitCode::FAILURE;
    };

    if let Err(e) = std::fs::create_dir_all(&config.output_dir) {
        error!(
            "Failed to create '{}': {}",
            config.output_dir.display(),
            e
        );
        return ExitCode::FAILURE;
    }

    info!(
        level = config.level,
        tiles_x, tiles_y, "rendering tiles"
    );
    let service = TileService::with_cache_capacity(server, config.cache_tiles);
    let mut written = 0usize;

    for tile_y in 0..tiles_y {
        for tile_x in 0..tiles_x {
            let request = TileRequest::new(config.level, tile_x, tile_y)
                .with_format(config.format.into())
                .with_quality(config.quality);
            let response = match service.get_tile(request).await {
                Ok(response) => response,
                Err(e) => {
                    error!("Tile ({}, {}) failed: {}", tile_x, tile_y, e);
                    return ExitCode::FAILURE;
                }
            };

            let path = config.tile_path(tile_x, tile_y);
            if let Err(e) = std::fs::write(&path, &response.data) {
                error!("Failed to write '{}': {}", path.display(), e);
                return ExitCode::FAILURE;
            }
            written += 1;
        }
    }

    let (size, _, _) = service.cache_stats().await;
    info!(
        "Wrote {} tile(s) to {} ({} bytes)",
        written,
        config.output_dir.display(),
        size
    );
    ExitCode::SUCCESS
}
