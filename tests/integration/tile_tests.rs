//! Tile rendering over transform pipelines.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use wsi_transform::{
    ImageRegion, ImageServer, InMemoryImageServer, RegionRequest, Rotation, SharedServer,
    TileCache, TileCacheKey, TileError, TileFormat, TileRequest, TileService,
    TransformedServerBuilder,
};

use super::test_utils::{gradient_rgb, named_server, CountingServer};

fn tiled_base(width: u32, height: u32) -> SharedServer {
    Arc::new(
        InMemoryImageServer::new("slide", gradient_rgb(width, height))
            .with_tile_size(64, 64)
            .with_downsamples(&[1.0, 2.0])
            .unwrap(),
    )
}

fn decode_rgb(data: &Bytes) -> image::RgbImage {
    image::load_from_memory(data).unwrap().to_rgb8()
}

#[tokio::test]
async fn test_png_tile_matches_region() {
    let pipeline = TransformedServerBuilder::new(tiled_base(150, 100))
        .crop(ImageRegion::new(10, 10, 100, 70))
        .unwrap()
        .rotate(Rotation::Cw180)
        .build();
    let service = TileService::new(pipeline.clone());

    let request = TileRequest::new(0, 1, 0).with_format(TileFormat::Png);
    let response = service.get_tile(request).await.unwrap();
    assert_eq!(response.format, TileFormat::Png);

    let tile = decode_rgb(&response.data);
    let expected = pipeline
        .read_region(&RegionRequest::full_resolution(ImageRegion::new(64, 0, 36, 64)))
        .await
        .unwrap();

    assert_eq!(tile.dimensions(), (36, 64));
    for (x, y, px) in tile.enumerate_pixels() {
        let want = expected.pixel(x, y);
        assert_eq!(
            [px[0] as f32, px[1] as f32, px[2] as f32],
            [want[0], want[1], want[2]],
            "pixel ({}, {})",
            x,
            y
        );
    }
}

#[tokio::test]
async fn test_edge_tile_at_coarser_level() {
    let pipeline = TransformedServerBuilder::new(tiled_base(150, 100))
        .extract_channels(&[1])
        .unwrap()
        .build();
    let service = TileService::new(pipeline);

    // Level 1 is 75 x 50: two columns, one row
    let request = TileRequest::new(1, 1, 0).with_format(TileFormat::Png);
    assert_eq!(
        service.tile_region(&request).unwrap(),
        ImageRegion::new(128, 0, 22, 100)
    );

    let response = service.get_tile(request).await.unwrap();
    let tile = image::load_from_memory(&response.data).unwrap();
    assert_eq!((tile.width(), tile.height()), (11, 50));
}

#[tokio::test]
async fn test_repeated_tile_hits_cache() {
    let counting = CountingServer::new(tiled_base(150, 100));
    let reads = counting.counter();
    let pipeline = TransformedServerBuilder::new(Arc::new(counting))
        .reorder_rgb("BGR")
        .unwrap()
        .build();
    let service = TileService::new(pipeline);

    let first = service.get_tile(TileRequest::new(0, 0, 0)).await.unwrap();
    let second = service.get_tile(TileRequest::new(0, 0, 0)).await.unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(first.data, second.data);
    assert_eq!(reads.load(Ordering::SeqCst), 1);

    // A different quality is a different tile
    let third = service
        .get_tile(TileRequest::new(0, 0, 0).with_quality(50))
        .await
        .unwrap();
    assert!(!third.cache_hit);
    assert_eq!(reads.load(Ordering::SeqCst), 2);

    let (size, _, entries) = service.cache_stats().await;
    assert_eq!(entries, 2);
    assert!(size > 0);

    service.clear_cache().await;
    assert_eq!(service.cache_stats().await.2, 0);
}

#[tokio::test]
async fn test_cache_keys_separate_pipelines() {
    let base = tiled_base(150, 100);
    let rotated = TransformedServerBuilder::new(base.clone())
        .rotate(Rotation::Cw90)
        .build();
    let request = TileRequest::new(0, 0, 0);

    let cache = TileCache::new();
    cache
        .put(TileCacheKey::new(base.id(), &request), Bytes::from_static(b"base"))
        .await;

    assert!(!cache.contains(&TileCacheKey::new(rotated.id(), &request)).await);
    assert_eq!(
        cache.get(&TileCacheKey::new(base.id(), &request)).await,
        Some(Bytes::from_static(b"base"))
    );
}

#[tokio::test]
async fn test_tile_errors() {
    let service = TileService::new(tiled_base(150, 100));

    assert!(matches!(
        service.get_tile(TileRequest::new(5, 0, 0)).await,
        Err(TileError::InvalidLevel { level: 5, .. })
    ));
    assert!(matches!(
        service.get_tile(TileRequest::new(0, 3, 0)).await,
        Err(TileError::TileOutOfBounds { x: 3, max_x: 3, .. })
    ));
    assert!(matches!(
        service
            .get_tile(TileRequest::new(0, 0, 0).with_quality(0))
            .await,
        Err(TileError::InvalidQuality { quality: 0 })
    ));
}

#[tokio::test]
async fn test_float_pipeline_renders_grayscale() {
    let pipeline = TransformedServerBuilder::new(named_server("fluo", 40, 20, &["A", "B"]))
        .average_channel_project()
        .unwrap()
        .build();
    let service = TileService::new(pipeline);

    let data = service
        .render_overview(16, TileFormat::Png, 80)
        .await
        .unwrap();
    let image = image::load_from_memory(&data).unwrap().to_luma8();

    assert_eq!(image.dimensions(), (40, 20));
    // Values increase left to right and are stretched over 0-255
    assert_eq!(image.get_pixel(0, 0)[0], 0);
    assert_eq!(image.get_pixel(39, 19)[0], 255);
}
