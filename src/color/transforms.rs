//! Per-pixel color transforms producing one derived channel.

use serde::{Deserialize, Serialize};

use crate::error::TransformError;
use crate::source::ImageServerMetadata;

/// A function from a pixel's channel vector to one scalar channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ColorTransform {
    /// Select a channel by 0-based index
    ChannelIndex { index: usize },

    /// Select the first channel with this name
    ChannelName { name: String },

    /// Minimum over all channels
    MinProjection,

    /// Mean over all channels
    MeanProjection,

    /// Maximum over all channels
    MaxProjection,
}

impl ColorTransform {
    pub fn channel(index: usize) -> Self {
        ColorTransform::ChannelIndex { index }
    }

    pub fn channel_named(name: impl Into<String>) -> Self {
        ColorTransform::ChannelName { name: name.into() }
    }

    /// Whether the transform copies an upstream channel unchanged.
    pub fn is_extraction(&self) -> bool {
        matches!(
            self,
            ColorTransform::ChannelIndex { .. } | ColorTransform::ChannelName { .. }
        )
    }

    /// Bind the transform to a concrete upstream channel layout.
    ///
    /// # Errors
    ///
    /// Returns `ChannelNotFound` if the name or index does not exist upstream.
    pub fn resolve(&self, metadata: &ImageServerMetadata) -> Result<ResolvedTransform, TransformError> {
        match self {
            ColorTransform::ChannelIndex { index } => {
                let channel = metadata.channels.get(*index).ok_or_else(|| {
                    TransformError::ChannelNotFound {
                        channel: format!(
                            "index {} (image has {} channels)",
                            index,
                            metadata.channel_count()
                        ),
                    }
                })?;
                Ok(ResolvedTransform {
                    kind: ResolvedKind::Channel(*index),
                    name: channel.name.clone(),
                    color: channel.color,
                })
            }
            ColorTransform::ChannelName { name } => {
                let index =
                    metadata
                        .channel_index(name)
                        .ok_or_else(|| TransformError::ChannelNotFound {
                            channel: name.clone(),
                        })?;
                Ok(ResolvedTransform {
                    kind: ResolvedKind::Channel(index),
                    name: name.clone(),
                    color: metadata.channels[index].color,
                })
            }
            ColorTransform::MinProjection => Ok(ResolvedTransform::projection(
                ResolvedKind::Min,
                "Min channels",
            )),
            ColorTransform::MeanProjection => Ok(ResolvedTransform::projection(
                ResolvedKind::Mean,
                "Mean channels",
            )),
            ColorTransform::MaxProjection => Ok(ResolvedTransform::projection(
                ResolvedKind::Max,
                "Max channels",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ResolvedKind {
    Channel(usize),
    Min,
    Mean,
    Max,
}

/// A [`ColorTransform`] bound to an upstream channel layout.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTransform {
    kind: ResolvedKind,
    name: String,
    color: u32,
}

impl ResolvedTransform {
    fn projection(kind: ResolvedKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            color: 0xFFFFFF,
        }
    }

    /// Output channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Output channel display color.
    pub fn color(&self) -> u32 {
        self.color
    }

    /// Upstream channel index for extractions.
    pub fn source_channel(&self) -> Option<usize> {
        match self.kind {
            ResolvedKind::Channel(c) => Some(c),
            _ => None,
        }
    }

    /// Apply to one pixel's channel values.
    pub fn apply(&self, pixel: &[f32]) -> f32 {
        match self.kind {
            ResolvedKind::Channel(c) => pixel[c],
            ResolvedKind::Min => pixel.iter().copied().fold(f32::INFINITY, f32::min),
            ResolvedKind::Max => pixel.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            ResolvedKind::Mean => {
                if pixel.is_empty() {
                    0.0
                } else {
                    pixel.iter().map(|&v| v as f64).sum::<f64>() as f32 / pixel.len() as f32
                }
            }
        }
    }
}
