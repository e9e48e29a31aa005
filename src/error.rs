use thiserror::Error;

/// I/O errors raised by leaf image sources.
///
/// Transform stages never interpret these; they propagate unchanged to the
/// caller through [`TransformError::Io`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IoError {
    /// The image source could not be located
    #[error("Image not found: {0}")]
    NotFound(String),

    /// Reading pixel data from the source failed
    #[error("Read error: {0}")]
    Read(String),

    /// Encoded image data could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Errors raised while constructing or reading a transform pipeline
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransformError {
    /// I/O error from the wrapped source
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Affine matrix cannot be inverted (or contains non-finite values)
    #[error("Invalid transform: {message}")]
    InvalidTransform { message: String },

    /// Sources disagree on extent, plane count, levels or pixel type
    #[error("Incompatible source: {message}")]
    IncompatibleSource { message: String },

    /// Named or indexed channel does not exist upstream
    #[error("Channel not found: {channel}")]
    ChannelNotFound { channel: String },

    /// Operation cannot process the given pixel type or channel layout
    #[error("Unsupported pixel type: {message}")]
    UnsupportedPixelType { message: String },

    /// Stage parameter is malformed (bad crop, bad RGB order, bad stain number)
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Requested resolution level does not exist
    #[error("Invalid level {level}: image has {level_count} levels")]
    InvalidLevel { level: usize, level_count: usize },

    /// Persisted pipeline could not be read or written
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Normalizer type is not present in the registry
    #[error("Unknown normalizer type: {0}")]
    UnknownNormalizer(String),
}

impl TransformError {
    pub(crate) fn invalid_parameter(message: impl Into<String>) -> Self {
        TransformError::InvalidParameter {
            message: message.into(),
        }
    }

    pub(crate) fn incompatible(message: impl Into<String>) -> Self {
        TransformError::IncompatibleSource {
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        TransformError::UnsupportedPixelType {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(err: serde_json::Error) -> Self {
        TransformError::Serialization(err.to_string())
    }
}

/// Errors that can occur when rendering tiles
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Error from the transform pipeline
    #[error("Pipeline error: {0}")]
    Transform(#[from] TransformError),

    /// Requested pyramid level does not exist
    #[error("Invalid level {level}: image has {max_levels} levels")]
    InvalidLevel { level: usize, max_levels: usize },

    /// Tile coordinates are out of bounds for the level
    #[error("Tile ({x}, {y}) out of bounds for level {level} (max: {max_x}, {max_y})")]
    TileOutOfBounds {
        level: usize,
        x: u32,
        y: u32,
        max_x: u32,
        max_y: u32,
    },

    /// JPEG quality outside 1-100
    #[error("Invalid quality {quality}: must be between 1 and 100")]
    InvalidQuality { quality: u8 },

    /// Failed to encode the rendered tile
    #[error("Failed to encode tile: {message}")]
    EncodeError { message: String },
}
