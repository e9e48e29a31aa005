//! Persisted pipeline representation.
//!
//! A pipeline is stored as the ordered list of stages applied to a base
//! server, each stage holding exactly its construction parameters:
//!
//! ```json
//! {
//!   "stages": [
//!     { "type": "Crop", "region": { "x": 0, "y": 0, "width": 512, "height": 512 } },
//!     { "type": "Rotate", "rotation": "ROTATE_90" },
//!     { "type": "Normalize", "normalizer": { "type": "OffsetScale", "offsets": [10.0] } }
//!   ]
//! }
//! ```
//!
//! The base server itself is not part of the description; callers supply it
//! again when rebuilding.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::color::{ColorDeconvolutionStains, ColorTransform};
use crate::error::TransformError;
use crate::normalize::NormalizerRegistry;
use crate::region::ImageRegion;
use crate::source::SharedServer;

use super::{AffineTransform, Rotation, TransformedServerBuilder};

/// Construction parameters of one transform stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StageSpec {
    Crop {
        region: ImageRegion,
    },
    AffineTransform {
        transform: AffineTransform,
    },
    ColorDeconvolution {
        stains: ColorDeconvolutionStains,
        #[serde(default)]
        stain_numbers: Vec<usize>,
    },
    RearrangeRgb {
        order: String,
    },
    Rotate {
        rotation: Rotation,
    },
    ChannelTransform {
        transforms: Vec<ColorTransform>,
    },
    /// `sources` are the non-primary sources, each a pipeline over the same
    /// base; the primary source is inserted at `position`.
    ConcatChannels {
        sources: Vec<PipelineSpec>,
        #[serde(default)]
        position: usize,
    },
    /// Tagged normalizer JSON, resolved through a [`NormalizerRegistry`].
    Normalize {
        normalizer: serde_json::Value,
    },
}

impl StageSpec {
    /// Variant name, as written in the `"type"` field.
    pub fn kind(&self) -> &'static str {
        match self {
            StageSpec::Crop { .. } => "Crop",
            StageSpec::AffineTransform { .. } => "AffineTransform",
            StageSpec::ColorDeconvolution { .. } => "ColorDeconvolution",
            StageSpec::RearrangeRgb { .. } => "RearrangeRgb",
            StageSpec::Rotate { .. } => "Rotate",
            StageSpec::ChannelTransform { .. } => "ChannelTransform",
            StageSpec::ConcatChannels { .. } => "ConcatChannels",
            StageSpec::Normalize { .. } => "Normalize",
        }
    }
}

/// Ordered stages applied to a base server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub stages: Vec<StageSpec>,
}

impl PipelineSpec {
    pub fn new(stages: Vec<StageSpec>) -> Self {
        Self { stages }
    }

    /// # Errors
    ///
    /// Returns `Serialization` for malformed JSON or unknown stage types.
    pub fn from_json(json: &str) -> Result<Self, TransformError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, TransformError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Describe the stages between `server` and its base server.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if some stage cannot describe itself, such as
    /// a concatenation whose sources were built on a different base.
    pub fn describe(server: &SharedServer) -> Result<Self, TransformError> {
        let mut stages = Vec::new();
        let mut current = server;
        while let Some(inner) = current.wrapped() {
            let stage = current.stage().ok_or_else(|| {
                TransformError::Serialization(format!(
                    "stage '{}' cannot be described relative to its base server",
                    current.metadata().name
                ))
            })?;
            stages.push(stage);
            current = inner;
        }
        stages.reverse();
        Ok(Self { stages })
    }

    /// Rebuild the pipeline over `base`.
    ///
    /// # Errors
    ///
    /// Returns the first stage construction error, or `UnknownNormalizer` if
    /// a normalizer type is missing from `registry`.
    pub fn build(
        &self,
        base: SharedServer,
        registry: &NormalizerRegistry,
    ) -> Result<SharedServer, TransformError> {
        let mut builder = TransformedServerBuilder::new(base.clone());
        for stage in &self.stages {
            debug!(stage = stage.kind(), "rebuilding stage");
            match stage {
                StageSpec::Crop { region } => {
                    builder.crop(*region)?;
                }
                StageSpec::AffineTransform { transform } => {
                    builder.transform(*transform)?;
                }
                StageSpec::ColorDeconvolution {
                    stains,
                    stain_numbers,
                } => {
                    builder.deconvolve_stains(stains.clone(), stain_numbers)?;
                }
                StageSpec::RearrangeRgb { order } => {
                    builder.reorder_rgb(order)?;
                }
                StageSpec::Rotate { rotation } => {
                    builder.rotate(*rotation);
                }
                StageSpec::ChannelTransform { transforms } => {
                    builder.channel_transforms(transforms.clone())?;
                }
                StageSpec::ConcatChannels { sources, position } => {
                    let mut servers = sources
                        .iter()
                        .map(|spec| spec.build(base.clone(), registry))
                        .collect::<Result<Vec<_>, _>>()?;
                    let position = (*position).min(servers.len());
                    servers.insert(position, builder.build());
                    builder.concat_channels(servers)?;
                }
                StageSpec::Normalize { normalizer } => {
                    builder.normalize(registry.create(normalizer)?)?;
                }
            }
        }
        Ok(builder.build())
    }
}
