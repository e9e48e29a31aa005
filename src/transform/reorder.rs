//! RGB channel rearrangement.

use async_trait::async_trait;
use tracing::debug;

use crate::error::TransformError;
use crate::region::RegionRequest;
use crate::source::{ImageServer, ImageServerMetadata, PixelBuffer, SharedServer};

use super::{derive_id, StageSpec};

/// Stage permuting the channels of an RGB image.
///
/// Intended for images whose channels were stored as BGR (or any other
/// order) but interpreted as RGB. With order `"BGR"`, output red takes the
/// upstream blue channel and output blue takes the upstream red channel.
#[derive(Debug)]
pub struct RearrangeRgbServer {
    server: SharedServer,
    order: String,
    mapping: [usize; 3],
    metadata: ImageServerMetadata,
    id: String,
}

impl RearrangeRgbServer {
    /// # Errors
    ///
    /// Returns `UnsupportedPixelType` unless the upstream is 8-bit RGB, and
    /// `InvalidParameter` unless `order` is a permutation of "RGB".
    pub fn new(server: SharedServer, order: &str) -> Result<Self, TransformError> {
        let upstream = server.metadata();
        if !upstream.is_rgb_uint8() {
            return Err(TransformError::unsupported(format!(
                "RGB reordering requires 8-bit RGB, '{}' has {} {:?} channels",
                upstream.name,
                upstream.channel_count(),
                upstream.pixel_type
            )));
        }

        let order = order.to_ascii_uppercase();
        let mapping = parse_order(&order)?;
        let metadata = upstream.clone();
        let id = derive_id(
            &[&server],
            &StageSpec::RearrangeRgb {
                order: order.clone(),
            },
        );

        debug!(upstream = %upstream.name, %order, "created RGB rearrangement stage");

        Ok(Self {
            server,
            order,
            mapping,
            metadata,
            id,
        })
    }

    pub fn order(&self) -> &str {
        &self.order
    }
}

fn parse_order(order: &str) -> Result<[usize; 3], TransformError> {
    let invalid = || {
        TransformError::invalid_parameter(format!(
            "RGB order '{}' must be a permutation of RGB",
            order
        ))
    };

    let chars: Vec<char> = order.chars().collect();
    if chars.len() != 3 {
        return Err(invalid());
    }

    let mut mapping = [0usize; 3];
    let mut seen = [false; 3];
    for (i, ch) in chars.iter().enumerate() {
        let source = match ch {
            'R' => 0,
            'G' => 1,
            'B' => 2,
            _ => return Err(invalid()),
        };
        if seen[source] {
            return Err(invalid());
        }
        seen[source] = true;
        mapping[i] = source;
    }
    Ok(mapping)
}

#[async_trait]
impl ImageServer for RearrangeRgbServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        self.validate_request(request)?;
        let fetched = self.server.read_region(request).await?;
        if fetched.channel_count() != 3 {
            return Err(TransformError::unsupported(format!(
                "RGB reordering received {} channels",
                fetched.channel_count()
            )));
        }

        let (width, height, pixel_type) = (fetched.width(), fetched.height(), fetched.pixel_type());
        let source = fetched.into_channels();
        let channels = self.mapping.iter().map(|&c| source[c].clone()).collect();

        PixelBuffer::new(width, height, pixel_type, channels)
            .ok_or_else(|| TransformError::incompatible("reordered channel length mismatch"))
    }

    fn wrapped(&self) -> Option<&SharedServer> {
        Some(&self.server)
    }

    fn stage(&self) -> Option<StageSpec> {
        Some(StageSpec::RearrangeRgb {
            order: self.order.clone(),
        })
    }
}
