//! Pixel normalizers.
//!
//! A [`PixelNormalizer`] maps a whole pixel buffer to a transformed buffer of
//! the same spatial size. Built-in normalizers:
//!
//! - [`OffsetScaleNormalizer`]: `(v - offset) * scale`, optionally clipped at 0
//! - [`StainNormalizer`]: stain deconvolution followed by reconvolution
//!
//! Custom normalizers implement the trait directly. To persist a pipeline that
//! uses one, register a factory for its type name in a [`NormalizerRegistry`]
//! and pass that registry to [`crate::transform::PipelineSpec::build`].

mod offset_scale;
mod stain;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::TransformError;
use crate::source::{ImageServerMetadata, PixelBuffer};

pub use offset_scale::OffsetScaleNormalizer;
pub use stain::StainNormalizer;

// =============================================================================
// PixelNormalizer Trait
// =============================================================================

/// Pure buffer-to-buffer transform applied by a normalizing stage.
pub trait PixelNormalizer: Send + Sync + fmt::Debug {
    /// Type discriminator used in persisted JSON.
    fn type_name(&self) -> &str;

    /// Check that the normalizer can process an upstream source.
    ///
    /// Called once when the normalizing stage is constructed.
    fn validate(&self, input: &ImageServerMetadata) -> Result<(), TransformError>;

    /// Metadata of the normalized output (channels, pixel type).
    fn output_metadata(&self, input: &ImageServerMetadata) -> ImageServerMetadata;

    /// Normalize one buffer.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPixelType` if the buffer has a layout the
    /// normalizer cannot process.
    fn apply(&self, buffer: PixelBuffer) -> Result<PixelBuffer, TransformError>;

    /// Tagged JSON describing every construction parameter.
    ///
    /// The object must contain a `"type"` field equal to [`Self::type_name`].
    fn to_json(&self) -> Result<serde_json::Value, TransformError>;
}

/// Shared handle to a normalizer.
pub type SharedNormalizer = Arc<dyn PixelNormalizer>;

// =============================================================================
// Normalizer
// =============================================================================

/// Persisted form of the built-in normalizers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Normalizer {
    OffsetScale(OffsetScaleNormalizer),
    StainNormalize(StainNormalizer),
}

impl Normalizer {
    pub fn into_shared(self) -> SharedNormalizer {
        match self {
            Normalizer::OffsetScale(n) => Arc::new(n),
            Normalizer::StainNormalize(n) => Arc::new(n),
        }
    }
}

// =============================================================================
// NormalizerRegistry
// =============================================================================

/// Builds a normalizer from its tagged JSON.
pub type NormalizerFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<SharedNormalizer, TransformError> + Send + Sync>;

/// Lookup table from normalizer type name to factory.
///
/// Passed explicitly to pipeline deserialization; there is no global
/// registry.
pub struct NormalizerRegistry {
    factories: HashMap<String, NormalizerFactory>,
}

impl NormalizerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry containing the built-in normalizers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in ["OffsetScale", "StainNormalize"] {
            registry.register(name, |json| {
                let normalizer: Normalizer = serde_json::from_value(json.clone())?;
                if let Normalizer::StainNormalize(ref n) = normalizer {
                    StainNormalizer::new(n.stains_in.clone(), n.stains_out.clone(), &n.scales)?;
                }
                Ok(normalizer.into_shared())
            });
        }
        registry
    }

    /// Register (or replace) the factory for a type name.
    pub fn register<F>(&mut self, type_name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<SharedNormalizer, TransformError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(type_name.into(), Box::new(factory));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    /// Build a normalizer from tagged JSON.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the JSON has no string `"type"` field and
    /// `UnknownNormalizer` if that type is not registered.
    pub fn create(&self, json: &serde_json::Value) -> Result<SharedNormalizer, TransformError> {
        let type_name = json
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| {
                TransformError::Serialization("normalizer JSON has no \"type\" field".to_string())
            })?;

        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| TransformError::UnknownNormalizer(type_name.to_string()))?;

        factory(json)
    }
}

impl Default for NormalizerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for NormalizerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("NormalizerRegistry")
            .field("types", &names)
            .finish()
    }
}
