//! Persisting pipelines and rebuilding them over a base image.

use std::sync::Arc;

use serde_json::json;
use wsi_transform::{
    AffineTransform, ColorDeconvolutionStains, ImageRegion, ImageServer, ImageServerMetadata,
    NormalizerRegistry, PipelineSpec, PixelBuffer, PixelNormalizer, PixelType, Rotation,
    SharedNormalizer, SharedServer, StageSpec, TransformError, TransformedServerBuilder,
};

use super::test_utils::{assert_buffers_close, named_server, read_all, rgb_server};

/// Reflects every sample about `max`.
#[derive(Debug)]
struct InvertNormalizer {
    max: f64,
}

impl PixelNormalizer for InvertNormalizer {
    fn type_name(&self) -> &str {
        "Invert"
    }

    fn validate(&self, _input: &ImageServerMetadata) -> Result<(), TransformError> {
        Ok(())
    }

    fn output_metadata(&self, input: &ImageServerMetadata) -> ImageServerMetadata {
        input.clone().with_pixel_type(PixelType::Float32).with_rgb(false)
    }

    fn apply(&self, buffer: PixelBuffer) -> Result<PixelBuffer, TransformError> {
        let (width, height) = (buffer.width(), buffer.height());
        let channels = buffer
            .into_channels()
            .into_iter()
            .map(|c| c.into_iter().map(|v| self.max as f32 - v).collect())
            .collect();
        Ok(PixelBuffer::new(width, height, PixelType::Float32, channels).unwrap())
    }

    fn to_json(&self) -> Result<serde_json::Value, TransformError> {
        Ok(json!({ "type": "Invert", "max": self.max }))
    }
}

fn registry_with_invert() -> NormalizerRegistry {
    let mut registry = NormalizerRegistry::with_defaults();
    registry.register("Invert", |value| {
        let max = value
            .get("max")
            .and_then(|m| m.as_f64())
            .ok_or_else(|| TransformError::Serialization("Invert needs a max".to_string()))?;
        let normalizer: SharedNormalizer = Arc::new(InvertNormalizer { max });
        Ok(normalizer)
    });
    registry
}

/// Describe `server`, pass the description through JSON text and rebuild it.
async fn assert_rebuilds(server: &SharedServer, base: SharedServer, registry: &NormalizerRegistry) {
    let spec = PipelineSpec::describe(server).unwrap();
    let text = spec.to_json().unwrap();
    let parsed = PipelineSpec::from_json(&text).unwrap();
    assert_eq!(parsed, spec);

    let rebuilt = parsed.build(base, registry).unwrap();
    assert_eq!(rebuilt.id(), server.id());
    assert_eq!(rebuilt.metadata(), server.metadata());
    assert_buffers_close(&read_all(&rebuilt, 0).await, &read_all(server, 0).await, 0.0);
}

#[tokio::test]
async fn test_geometry_and_color_pipeline_rebuilds() {
    let base = rgb_server("he", 48, 32);
    let server = TransformedServerBuilder::new(base.clone())
        .crop(ImageRegion::new(4, 2, 40, 28))
        .unwrap()
        .transform(AffineTransform::scale(1.5, 1.5))
        .unwrap()
        .rotate(Rotation::Cw90)
        .reorder_rgb("BGR")
        .unwrap()
        .deconvolve_stains(ColorDeconvolutionStains::hematoxylin_eosin(), &[2, 1])
        .unwrap()
        .subtract_offset_and_scale(&[0.05], &[100.0])
        .unwrap()
        .build();

    let spec = PipelineSpec::describe(&server).unwrap();
    let kinds: Vec<&str> = spec.stages.iter().map(StageSpec::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "Crop",
            "AffineTransform",
            "Rotate",
            "RearrangeRgb",
            "ColorDeconvolution",
            "Normalize"
        ]
    );

    assert_rebuilds(&server, base, &NormalizerRegistry::with_defaults()).await;
}

#[tokio::test]
async fn test_stain_normalize_rebuilds() {
    let base = rgb_server("he", 24, 16);
    let server = TransformedServerBuilder::new(base.clone())
        .stain_normalize(
            ColorDeconvolutionStains::hematoxylin_eosin(),
            ColorDeconvolutionStains::hematoxylin_dab(),
            &[1.0, 0.5, 0.0],
        )
        .unwrap()
        .build();

    assert_rebuilds(&server, base, &NormalizerRegistry::with_defaults()).await;
}

#[tokio::test]
async fn test_concat_rebuilds_with_primary_position() {
    let base = named_server("fluo", 16, 8, &["DAPI", "FITC", "TRITC", "Cy5"]);
    let head = TransformedServerBuilder::new(base.clone())
        .extract_channels_by_name(&["DAPI"])
        .unwrap()
        .build();
    let tail = TransformedServerBuilder::new(base.clone())
        .extract_channels(&[3])
        .unwrap()
        .build();

    let server = TransformedServerBuilder::new(head.clone())
        .concat_channels(vec![tail, head])
        .unwrap()
        .max_channel_project()
        .unwrap()
        .build();

    let spec = PipelineSpec::describe(&server).unwrap();
    match &spec.stages[1] {
        StageSpec::ConcatChannels { sources, position } => {
            assert_eq!(*position, 1);
            assert_eq!(sources.len(), 1);
            assert_eq!(sources[0].stages.len(), 1);
        }
        other => panic!("Expected concatenation, got {:?}", other),
    }

    assert_rebuilds(&server, base, &NormalizerRegistry::with_defaults()).await;
}

#[tokio::test]
async fn test_concat_over_other_base_cannot_be_described() {
    let base = named_server("a", 16, 8, &["A"]);
    let other = named_server("b", 16, 8, &["B"]);
    let server = TransformedServerBuilder::new(base)
        .concat_channels(vec![other])
        .unwrap()
        .build();

    assert_eq!(server.channel_names(), vec!["A", "B"]);
    assert!(matches!(
        PipelineSpec::describe(&server),
        Err(TransformError::Serialization(_))
    ));
}

#[tokio::test]
async fn test_custom_normalizer_needs_registration() {
    let base = named_server("fluo", 8, 8, &["A", "B"]);
    let server = TransformedServerBuilder::new(base.clone())
        .normalize(Arc::new(InvertNormalizer { max: 4000.0 }))
        .unwrap()
        .build();

    let spec = PipelineSpec::describe(&server).unwrap();
    assert_eq!(
        spec.build(base.clone(), &NormalizerRegistry::with_defaults())
            .unwrap_err(),
        TransformError::UnknownNormalizer("Invert".to_string())
    );

    assert_rebuilds(&server, base, &registry_with_invert()).await;
}

#[tokio::test]
async fn test_hand_written_pipeline() {
    let json = r#"{
        "stages": [
            { "type": "Crop", "region": { "x": 2, "y": 2, "width": 10, "height": 6 } },
            { "type": "Rotate", "rotation": "ROTATE_270" },
            { "type": "ChannelTransform", "transforms": [
                { "type": "ChannelName", "name": "Green" },
                { "type": "MeanProjection" }
            ] },
            { "type": "Normalize", "normalizer": { "type": "OffsetScale", "scales": [2.0] } }
        ]
    }"#;
    let base = rgb_server("rgb", 20, 12);
    let server = PipelineSpec::from_json(json)
        .unwrap()
        .build(base.clone(), &NormalizerRegistry::with_defaults())
        .unwrap();

    assert_eq!((server.width(), server.height()), (6, 10));
    assert_eq!(server.channel_names(), vec!["Green", "Mean channels"]);

    let expected = TransformedServerBuilder::new(base)
        .crop(ImageRegion::new(2, 2, 10, 6))
        .unwrap()
        .rotate(Rotation::Cw270)
        .channel_transforms(vec![
            wsi_transform::ColorTransform::channel_named("Green"),
            wsi_transform::ColorTransform::MeanProjection,
        ])
        .unwrap()
        .scale_channels(&[2.0])
        .unwrap()
        .build();
    assert_eq!(server.id(), expected.id());
    assert_buffers_close(&read_all(&server, 0).await, &read_all(&expected, 0).await, 0.0);
}

#[tokio::test]
async fn test_malformed_pipelines() {
    let base = rgb_server("rgb", 8, 8);

    assert!(matches!(
        PipelineSpec::from_json(r#"{ "stages": [ { "type": "Blur" } ] }"#),
        Err(TransformError::Serialization(_))
    ));

    let unknown = PipelineSpec::new(vec![StageSpec::Normalize {
        normalizer: json!({ "type": "Mystery" }),
    }]);
    assert_eq!(
        unknown
            .build(base.clone(), &NormalizerRegistry::with_defaults())
            .unwrap_err(),
        TransformError::UnknownNormalizer("Mystery".to_string())
    );

    // Stage parameters are validated again on rebuild
    let bad_order = PipelineSpec::new(vec![StageSpec::RearrangeRgb {
        order: "RGR".to_string(),
    }]);
    assert!(matches!(
        bad_order.build(base, &NormalizerRegistry::with_defaults()),
        Err(TransformError::InvalidParameter { .. })
    ));
}
