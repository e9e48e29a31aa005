//! End-to-end behaviour of transform chains.

use std::f64::consts::FRAC_PI_2;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use wsi_transform::{
    AffineTransform, ColorDeconvolutionStains, ImageRegion, ImageServer, InMemoryImageServer,
    IoError, PixelBuffer, PixelType, RegionRequest, Rotation, SharedServer, StainVector,
    TransformError, TransformedServerBuilder,
};

use super::test_utils::{
    assert_buffers_close, gradient_rgb, named_server, read, read_all, rgb_server, CountingServer,
    FailingServer, MislabelledServer,
};

// =============================================================================
// Geometry
// =============================================================================

async fn assert_affine_round_trip(base: &SharedServer, transform: AffineTransform, level: usize) {
    let inverse = transform.inverse().unwrap();
    let server = TransformedServerBuilder::new(base.clone())
        .transform(transform)
        .unwrap()
        .transform(inverse)
        .unwrap()
        .build();

    assert_eq!(server.width(), base.width());
    assert_eq!(server.height(), base.height());
    assert_buffers_close(
        &read_all(&server, level).await,
        &read_all(base, level).await,
        0.0,
    );
}

#[tokio::test]
async fn test_affine_then_inverse_is_identity() {
    let base = rgb_server("rgb", 20, 12);

    assert_affine_round_trip(&base, AffineTransform::scale(2.0, 2.0), 0).await;
    assert_affine_round_trip(&base, AffineTransform::translation(3.0, 2.0), 0).await;

    let quarter_turn =
        AffineTransform::rotation(FRAC_PI_2).then(&AffineTransform::translation(12.0, 0.0));
    assert_affine_round_trip(&base, quarter_turn, 0).await;
}

#[tokio::test]
async fn test_affine_round_trip_through_negative_coordinates() {
    let base = rgb_server("rgb", 20, 12);

    assert_affine_round_trip(&base, AffineTransform::rotation(FRAC_PI_2), 0).await;
    assert_affine_round_trip(&base, AffineTransform::scale(-1.0, 1.0), 0).await;
    assert_affine_round_trip(&base, AffineTransform::translation(-5.0, 0.0), 0).await;
    assert_affine_round_trip(&base, AffineTransform::rotation(-FRAC_PI_2 * 3.0), 0).await;
}

#[tokio::test]
async fn test_affine_round_trip_at_coarser_levels() {
    let base: SharedServer = Arc::new(
        InMemoryImageServer::new("rgb", gradient_rgb(40, 24))
            .with_downsamples(&[1.0, 2.0, 4.0])
            .unwrap(),
    );

    for level in 0..3 {
        assert_affine_round_trip(&base, AffineTransform::translation(3.0, 2.0), level).await;
        assert_affine_round_trip(&base, AffineTransform::scale(-1.0, 1.0), level).await;
        assert_affine_round_trip(&base, AffineTransform::rotation(FRAC_PI_2), level).await;
    }
}

#[tokio::test]
async fn test_affine_keeps_content_at_negative_coordinates() {
    let base = rgb_server("rgb", 20, 12);

    let mirrored = TransformedServerBuilder::new(base.clone())
        .transform(AffineTransform::scale(-1.0, 1.0))
        .unwrap()
        .build();
    assert_eq!((mirrored.width(), mirrored.height()), (20, 12));

    // Column x of the mirror is column 19 - x of the base
    let pixels = read_all(&mirrored, 0).await;
    let expected = read_all(&base, 0).await;
    for y in 0..12 {
        for x in 0..20 {
            assert_eq!(pixels.pixel(x, y), expected.pixel(19 - x, y), "pixel ({}, {})", x, y);
        }
    }

    // A pure translation only moves the origin
    let shifted = TransformedServerBuilder::new(base.clone())
        .transform(AffineTransform::translation(-5.0, 7.0))
        .unwrap()
        .build();
    assert_buffers_close(&read_all(&shifted, 0).await, &expected, 0.0);
}

#[tokio::test]
async fn test_affine_quarter_turn_matches_rotation() {
    let base = rgb_server("rgb", 20, 12);
    let quarter_turn =
        AffineTransform::rotation(FRAC_PI_2).then(&AffineTransform::translation(12.0, 0.0));

    let rotated = TransformedServerBuilder::new(base.clone())
        .rotate(Rotation::Cw90)
        .build();
    let expected = read_all(&rotated, 0).await;

    for transform in [quarter_turn, AffineTransform::rotation(FRAC_PI_2)] {
        let affine = TransformedServerBuilder::new(base.clone())
            .transform(transform)
            .unwrap()
            .build();
        assert_eq!((affine.width(), affine.height()), (12, 20));
        assert_buffers_close(&read_all(&affine, 0).await, &expected, 0.0);
    }
}

#[tokio::test]
async fn test_crop_matches_sub_region() {
    let base: SharedServer = Arc::new(
        InMemoryImageServer::new("rgb", gradient_rgb(40, 30))
            .with_downsamples(&[1.0, 2.0])
            .unwrap(),
    );
    let crop = ImageRegion::new(4, 6, 20, 12);
    let cropped = TransformedServerBuilder::new(base.clone())
        .crop(crop)
        .unwrap()
        .build();

    assert_eq!((cropped.width(), cropped.height()), (20, 12));

    for level in 0..2 {
        let expected = base
            .read_region(&RegionRequest::new(crop, level))
            .await
            .unwrap();
        let actual = read_all(&cropped, level).await;
        assert_buffers_close(&actual, &expected, 0.0);
    }

    let inner = read(&cropped, 2, 3, 5, 4).await;
    let expected = read(&base, 6, 9, 5, 4).await;
    assert_buffers_close(&inner, &expected, 0.0);
}

#[tokio::test]
async fn test_crop_outside_returns_empty() {
    let cropped = TransformedServerBuilder::new(rgb_server("rgb", 40, 30))
        .crop(ImageRegion::new(10, 10, 10, 10))
        .unwrap()
        .build();

    let outside = read(&cropped, 50, 50, 8, 8).await;
    assert!(outside.is_empty());
    assert_eq!(outside.channel_count(), 3);

    // Partial overlap is padded to the requested size
    let partial = read(&cropped, 5, 5, 8, 8).await;
    assert_eq!((partial.width(), partial.height()), (8, 8));
    assert_eq!(partial.get(7, 7, 0), 0.0);
}

#[tokio::test]
async fn test_rotate_then_inverse_is_identity() {
    let base = rgb_server("rgb", 17, 9);

    for (first, second) in [
        (Rotation::Cw90, Rotation::Cw270),
        (Rotation::Cw270, Rotation::Cw90),
        (Rotation::Cw180, Rotation::Cw180),
    ] {
        let server = TransformedServerBuilder::new(base.clone())
            .rotate(first)
            .rotate(second)
            .build();
        assert_eq!((server.width(), server.height()), (17, 9));
        assert_buffers_close(&read_all(&server, 0).await, &read_all(&base, 0).await, 0.0);
    }
}

#[tokio::test]
async fn test_extreme_coordinates_do_not_overflow() {
    let base = rgb_server("rgb", 20, 12);

    let err = TransformedServerBuilder::new(base.clone())
        .crop(ImageRegion::new(i64::MAX - 2, 0, 10, 10))
        .unwrap_err();
    assert!(matches!(err, TransformError::InvalidParameter { .. }));

    let rotated = TransformedServerBuilder::new(base.clone())
        .rotate(Rotation::Cw90)
        .build();
    let affine = TransformedServerBuilder::new(base.clone())
        .transform(AffineTransform::rotation(FRAC_PI_2))
        .unwrap()
        .build();
    let cropped = TransformedServerBuilder::new(base)
        .crop(ImageRegion::new(2, 2, 10, 8))
        .unwrap()
        .build();

    for server in [&rotated, &affine] {
        for (x, y) in [(i64::MIN + 1, 0), (0, i64::MIN + 1), (i64::MAX - 1, i64::MAX - 1)] {
            let pixels = read(server, x, y, 4, 4).await;
            assert_eq!((pixels.width(), pixels.height()), (4, 4));
            assert!(pixels.pixel(0, 0).iter().all(|v| *v == 0.0));
        }
    }
    assert!(read(&cropped, i64::MIN + 1, 0, 4, 4).await.is_empty());
}

#[tokio::test]
async fn test_rotate_swaps_axes() {
    let base = rgb_server("rgb", 17, 9);
    let rotated = TransformedServerBuilder::new(base.clone())
        .rotate(Rotation::Cw90)
        .build();

    assert_eq!((rotated.width(), rotated.height()), (9, 17));

    // Top-left of the rotated image is the bottom-left of the original
    let corner = read(&rotated, 0, 0, 1, 1).await;
    let original = read(&base, 0, 8, 1, 1).await;
    assert_eq!(corner.pixel(0, 0), original.pixel(0, 0));
}

// =============================================================================
// Channels
// =============================================================================

#[tokio::test]
async fn test_extract_channels_idempotent() {
    let base = named_server("fluo", 16, 8, &["DAPI", "FITC", "TRITC", "Cy5"]);

    let once = TransformedServerBuilder::new(base.clone())
        .extract_channels(&[2, 0])
        .unwrap()
        .build();
    let twice = TransformedServerBuilder::new(once.clone())
        .extract_channels(&[0, 1])
        .unwrap()
        .build();

    assert_eq!(twice.channel_names(), vec!["TRITC", "DAPI"]);
    assert_eq!(twice.pixel_type(), PixelType::Uint16);
    assert_buffers_close(&read_all(&twice, 0).await, &read_all(&once, 0).await, 0.0);

    let by_name = TransformedServerBuilder::new(base)
        .extract_channels_by_name(&["TRITC", "DAPI"])
        .unwrap()
        .build();
    assert_buffers_close(&read_all(&by_name, 0).await, &read_all(&once, 0).await, 0.0);
}

#[tokio::test]
async fn test_concat_disjoint_channel_sets() {
    let base = named_server("fluo", 16, 8, &["DAPI", "FITC", "TRITC", "Cy5"]);
    let head = TransformedServerBuilder::new(base.clone())
        .extract_channels(&[0, 1])
        .unwrap()
        .build();
    let tail = TransformedServerBuilder::new(base.clone())
        .extract_channels(&[2, 3])
        .unwrap()
        .build();

    let joined = TransformedServerBuilder::new(head)
        .concat_channels(vec![tail])
        .unwrap()
        .build();

    assert_eq!(joined.channel_names(), base.channel_names());
    assert_eq!(joined.pixel_type(), PixelType::Uint16);
    assert_buffers_close(&read_all(&joined, 0).await, &read_all(&base, 0).await, 0.0);
}

#[tokio::test]
async fn test_projection_after_deconvolution() {
    let server = TransformedServerBuilder::new(rgb_server("rgb", 12, 6))
        .deconvolve_stains(ColorDeconvolutionStains::hematoxylin_eosin(), &[])
        .unwrap()
        .max_channel_project()
        .unwrap()
        .build();

    assert_eq!(server.channel_count(), 1);
    assert_eq!(server.pixel_type(), PixelType::Float32);
    let buffer = read_all(&server, 0).await;
    assert_eq!((buffer.width(), buffer.height()), (12, 6));
}

#[tokio::test]
async fn test_reorder_then_reorder_back() {
    let base = rgb_server("rgb", 10, 10);
    let server = TransformedServerBuilder::new(base.clone())
        .reorder_rgb("GBR")
        .unwrap()
        .reorder_rgb("BRG")
        .unwrap()
        .build();

    assert_buffers_close(&read_all(&server, 0).await, &read_all(&base, 0).await, 0.0);
}

// =============================================================================
// Normalization
// =============================================================================

fn moderate_rgb(width: u32, height: u32) -> PixelBuffer {
    let mut buffer = PixelBuffer::zeros(width, height, 3, PixelType::Uint8);
    for y in 0..height {
        for x in 0..width {
            buffer.set(x, y, 0, (80 + (x * 7 + y * 3) % 141) as f32);
            buffer.set(x, y, 1, (80 + (x * 5 + y * 11) % 141) as f32);
            buffer.set(x, y, 2, (80 + (x * 3 + y * 13 + 40) % 141) as f32);
        }
    }
    buffer
}

fn altered_stains() -> ColorDeconvolutionStains {
    ColorDeconvolutionStains::with_residual(
        "altered H&E",
        StainVector::new("Hematoxylin", 0.62, 0.72, 0.31).unwrap(),
        StainVector::new("Eosin", 0.25, 0.78, 0.57).unwrap(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_stain_normalize_swapped_restores_input() {
    let base: SharedServer = Arc::new(InMemoryImageServer::new("he", moderate_rgb(32, 24)));
    let original = ColorDeconvolutionStains::hematoxylin_eosin();

    let forward = TransformedServerBuilder::new(base.clone())
        .stain_normalize(original.clone(), altered_stains(), &[1.0, 1.0, 1.0])
        .unwrap()
        .build();
    let restored = TransformedServerBuilder::new(forward.clone())
        .stain_normalize(altered_stains(), original, &[1.0, 1.0, 1.0])
        .unwrap()
        .build();

    let expected = read_all(&base, 0).await;
    let changed = read_all(&forward, 0).await;
    assert_ne!(changed.channels(), expected.channels());
    assert_eq!(changed.pixel_type(), PixelType::Uint8);

    assert_buffers_close(&read_all(&restored, 0).await, &expected, 2.0);
}

#[tokio::test]
async fn test_offset_and_scale() {
    let base = named_server("fluo", 8, 4, &["A", "B"]);
    let server = TransformedServerBuilder::new(base.clone())
        .subtract_offset_and_scale(&[10.0, 1000.0], &[2.0, 0.5])
        .unwrap()
        .build();

    assert_eq!(server.pixel_type(), PixelType::Float32);
    let input = read_all(&base, 0).await;
    let output = read_all(&server, 0).await;
    assert_eq!(output.get(3, 2, 0), (input.get(3, 2, 0) - 10.0) * 2.0);
    assert_eq!(output.get(3, 2, 1), (input.get(3, 2, 1) - 1000.0) * 0.5);
}

#[tokio::test]
async fn test_clip_zero() {
    let base = named_server("fluo", 8, 4, &["A"]);
    let server = TransformedServerBuilder::new(base)
        .subtract_offset_and_clip_zero(&[25.0])
        .unwrap()
        .build();

    let output = read_all(&server, 0).await;
    assert_eq!(output.get(0, 0, 0), 0.0);
    assert_eq!(output.get(7, 3, 0), 12.0);
}

// =============================================================================
// Builder Semantics
// =============================================================================

#[tokio::test]
async fn test_singular_transform_keeps_prior_stages() {
    let base = rgb_server("rgb", 30, 20);
    let mut builder = TransformedServerBuilder::new(base);
    builder.crop(ImageRegion::new(5, 5, 10, 10)).unwrap();
    let cropped = builder.build();

    let err = builder
        .transform(AffineTransform::new(1.0, 2.0, 2.0, 4.0, 0.0, 0.0))
        .unwrap_err();
    assert!(matches!(err, TransformError::InvalidTransform { .. }));

    let current = builder.build();
    assert_eq!(current.id(), cropped.id());
    assert_eq!((current.width(), current.height()), (10, 10));
    assert_buffers_close(&read_all(&current, 0).await, &read_all(&cropped, 0).await, 0.0);
}

#[tokio::test]
async fn test_ids_track_parameters() {
    let base = rgb_server("rgb", 30, 20);
    let crop = |region: ImageRegion| {
        TransformedServerBuilder::new(base.clone())
            .crop(region)
            .unwrap()
            .build()
    };

    let a = crop(ImageRegion::new(0, 0, 10, 10));
    let b = crop(ImageRegion::new(0, 0, 10, 10));
    let c = crop(ImageRegion::new(1, 0, 10, 10));

    assert_eq!(a.id(), b.id());
    assert_ne!(a.id(), c.id());
    assert_ne!(a.id(), base.id());
}

#[tokio::test]
async fn test_chain_reads_base_once_per_request() {
    let counting = CountingServer::new(rgb_server("rgb", 30, 20));
    let reads = counting.counter();
    let base: SharedServer = Arc::new(counting);

    let server = TransformedServerBuilder::new(base)
        .crop(ImageRegion::new(2, 2, 20, 16))
        .unwrap()
        .rotate(Rotation::Cw180)
        .reorder_rgb("BGR")
        .unwrap()
        .extract_channels(&[0])
        .unwrap()
        .build();

    read(&server, 0, 0, 8, 8).await;
    assert_eq!(reads.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn test_io_error_propagates_unchanged() {
    let error = IoError::Read("connection reset".to_string());
    let base: SharedServer = Arc::new(FailingServer::rgb(32, 32, error.clone()));

    let server = TransformedServerBuilder::new(base)
        .crop(ImageRegion::new(0, 0, 16, 16))
        .unwrap()
        .rotate(Rotation::Cw90)
        .reorder_rgb("BGR")
        .unwrap()
        .deconvolve_stains(ColorDeconvolutionStains::hematoxylin_dab(), &[1])
        .unwrap()
        .subtract_offset(&[0.1])
        .unwrap()
        .build();

    let err = server
        .read_region(&RegionRequest::full_resolution(ImageRegion::new(0, 0, 8, 8)))
        .await
        .unwrap_err();
    assert_eq!(err, TransformError::Io(error));
}

#[tokio::test]
async fn test_missing_channel() {
    let base = named_server("fluo", 8, 8, &["DAPI", "FITC"]);
    let mut builder = TransformedServerBuilder::new(base);

    let err = builder.extract_channels_by_name(&["Cy5"]).unwrap_err();
    assert_eq!(
        err,
        TransformError::ChannelNotFound {
            channel: "Cy5".to_string()
        }
    );
    assert!(matches!(
        builder.extract_channels(&[2]),
        Err(TransformError::ChannelNotFound { .. })
    ));
}

#[tokio::test]
async fn test_unsupported_pixel_type() {
    let fluorescence = named_server("fluo", 8, 8, &["A", "B", "C"]);
    let mut builder = TransformedServerBuilder::new(fluorescence);
    assert!(matches!(
        builder.deconvolve_stains(ColorDeconvolutionStains::hematoxylin_eosin(), &[]),
        Err(TransformError::UnsupportedPixelType { .. })
    ));
    assert!(matches!(
        builder.reorder_rgb("BGR"),
        Err(TransformError::UnsupportedPixelType { .. })
    ));

    // Metadata claims RGB, pixels disagree: rejected at read time
    let mislabelled: SharedServer = Arc::new(MislabelledServer::new(8, 8));
    let server = TransformedServerBuilder::new(mislabelled)
        .deconvolve_stains(ColorDeconvolutionStains::hematoxylin_eosin(), &[])
        .unwrap()
        .build();
    let err = server
        .read_region(&RegionRequest::full_resolution(ImageRegion::new(0, 0, 4, 4)))
        .await
        .unwrap_err();
    assert!(matches!(err, TransformError::UnsupportedPixelType { .. }));
}

#[tokio::test]
async fn test_concat_incompatible_sources() {
    let base = named_server("a", 16, 8, &["A"]);
    let smaller = named_server("b", 15, 8, &["B"]);
    let float = TransformedServerBuilder::new(base.clone())
        .average_channel_project()
        .unwrap()
        .build();

    let mut builder = TransformedServerBuilder::new(base.clone());
    assert!(matches!(
        builder.concat_channels(vec![smaller]),
        Err(TransformError::IncompatibleSource { .. })
    ));
    assert!(matches!(
        builder.concat_channels(vec![float]),
        Err(TransformError::IncompatibleSource { .. })
    ));
    assert_eq!(builder.build().id(), base.id());
}

#[tokio::test]
async fn test_invalid_level() {
    let server = TransformedServerBuilder::new(rgb_server("rgb", 8, 8))
        .rotate(Rotation::Cw90)
        .build();
    let err = server
        .read_region(&RegionRequest::new(ImageRegion::new(0, 0, 8, 8), 9))
        .await
        .unwrap_err();
    assert!(matches!(err, TransformError::InvalidLevel { level: 9, .. }));
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_match_sequential() {
    let base = rgb_server("rgb", 64, 48);
    let server = TransformedServerBuilder::new(base)
        .crop(ImageRegion::new(4, 4, 56, 40))
        .unwrap()
        .rotate(Rotation::Cw270)
        .deconvolve_stains(ColorDeconvolutionStains::hematoxylin_eosin(), &[1, 2])
        .unwrap()
        .build();

    let regions: Vec<ImageRegion> = (0..5)
        .flat_map(|ty| (0..4).map(move |tx| ImageRegion::new(tx * 10, ty * 12, 10, 12)))
        .collect();

    let mut expected = Vec::with_capacity(regions.len());
    for region in &regions {
        expected.push(read(&server, region.x, region.y, region.width, region.height).await);
    }

    let handles: Vec<_> = regions
        .iter()
        .map(|&region| {
            let server = server.clone();
            tokio::spawn(async move {
                server
                    .read_region(&RegionRequest::full_resolution(region))
                    .await
            })
        })
        .collect();

    for (handle, expected) in handles.into_iter().zip(&expected) {
        let actual = handle.await.unwrap().unwrap();
        assert_buffers_close(&actual, expected, 0.0);
    }
}
