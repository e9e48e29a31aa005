//! Channel concatenation stage.
//!
//! Presents several sources with identical geometry as one source whose
//! channels are the concatenation of every source's channels, in order.
//!
//! One of the sources is the *primary*: the server the stage was built on
//! top of. It supplies the output metadata and is the stage's `wrapped()`
//! link, so a chain stays walkable back to its base. The remaining sources
//! are described as nested pipelines when the chain is persisted.

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::error::TransformError;
use crate::region::RegionRequest;
use crate::source::{
    base_server, same_server, ImageServer, ImageServerMetadata, PixelBuffer, SharedServer,
};

use super::{derive_id, PipelineSpec, StageSpec};

/// Relative tolerance when comparing pyramid downsamples.
const DOWNSAMPLE_TOLERANCE: f64 = 1e-6;

/// Stage concatenating the channels of several sources.
#[derive(Debug)]
pub struct ConcatChannelsServer {
    server: SharedServer,
    sources: Vec<SharedServer>,
    primary: usize,
    metadata: ImageServerMetadata,
    id: String,
}

impl ConcatChannelsServer {
    /// Concatenate `sources`, with `server` as the primary source.
    ///
    /// If `server` is not already in `sources` (by pointer identity) it is
    /// prepended; otherwise it keeps its position and is not duplicated.
    ///
    /// # Errors
    ///
    /// Returns `IncompatibleSource` if any source differs from `server` in
    /// width, height, plane counts, tile size, pyramid or pixel type.
    pub fn new(server: SharedServer, sources: Vec<SharedServer>) -> Result<Self, TransformError> {
        let (sources, primary) = match sources.iter().position(|s| same_server(s, &server)) {
            Some(index) => (sources, index),
            None => {
                let mut all = Vec::with_capacity(sources.len() + 1);
                all.push(server.clone());
                all.extend(sources);
                (all, 0)
            }
        };

        let reference = server.metadata();
        for source in &sources {
            check_compatible(reference, source.metadata())?;
        }

        let channels = sources
            .iter()
            .flat_map(|s| s.metadata().channels.iter().cloned())
            .collect();
        let mut metadata = reference.clone().with_channels(channels);
        if sources.len() > 1 {
            metadata.is_rgb = false;
        }

        let upstreams: Vec<&SharedServer> = sources.iter().collect();
        let id = derive_id(
            &upstreams,
            &StageSpec::ConcatChannels {
                sources: Vec::new(),
                position: primary,
            },
        );

        debug!(
            upstream = %reference.name,
            sources = sources.len(),
            channels = metadata.channel_count(),
            "created channel concatenation stage"
        );

        Ok(Self {
            server,
            sources,
            primary,
            metadata,
            id,
        })
    }

    /// Every concatenated source in channel order, primary included.
    pub fn sources(&self) -> &[SharedServer] {
        &self.sources
    }

    /// Position of the primary source in [`Self::sources`].
    pub fn primary_position(&self) -> usize {
        self.primary
    }
}

fn check_compatible(
    reference: &ImageServerMetadata,
    other: &ImageServerMetadata,
) -> Result<(), TransformError> {
    let mismatch = |what: &str, a: String, b: String| -> Result<(), TransformError> {
        Err(TransformError::incompatible(format!(
            "cannot concatenate '{}' with '{}': {} {} != {}",
            other.name, reference.name, what, b, a
        )))
    };

    if (reference.width, reference.height) != (other.width, other.height) {
        return mismatch(
            "size",
            format!("{}x{}", reference.width, reference.height),
            format!("{}x{}", other.width, other.height),
        );
    }
    if (reference.size_z, reference.size_t) != (other.size_z, other.size_t) {
        return mismatch(
            "planes (z, t)",
            format!("({}, {})", reference.size_z, reference.size_t),
            format!("({}, {})", other.size_z, other.size_t),
        );
    }
    if (reference.tile_width, reference.tile_height) != (other.tile_width, other.tile_height) {
        return mismatch(
            "tile size",
            format!("{}x{}", reference.tile_width, reference.tile_height),
            format!("{}x{}", other.tile_width, other.tile_height),
        );
    }
    if reference.pixel_type != other.pixel_type {
        return mismatch(
            "pixel type",
            format!("{:?}", reference.pixel_type),
            format!("{:?}", other.pixel_type),
        );
    }

    let same_levels = reference.levels.len() == other.levels.len()
        && reference.levels.iter().zip(&other.levels).all(|(a, b)| {
            (a.downsample - b.downsample).abs() <= DOWNSAMPLE_TOLERANCE * a.downsample.max(1.0)
        });
    if !same_levels {
        let downsamples = |m: &ImageServerMetadata| {
            format!("{:?}", m.levels.iter().map(|l| l.downsample).collect::<Vec<_>>())
        };
        return mismatch("downsamples", downsamples(reference), downsamples(other));
    }

    Ok(())
}

#[async_trait]
impl ImageServer for ConcatChannelsServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        let downsample = self.validate_request(request)?;
        let (out_w, out_h) = request.output_size(downsample);

        let mut fetched = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            fetched.push(source.read_region(request).await?);
        }

        // Cropped sources return 0x0 outside their extent
        if fetched.iter().all(PixelBuffer::is_empty) {
            trace!(region = ?request.region, "all concatenated sources empty");
            return Ok(PixelBuffer::empty(
                self.metadata.channel_count(),
                self.metadata.pixel_type,
            ));
        }

        let mut channels = Vec::with_capacity(self.metadata.channel_count());
        for (source, buffer) in self.sources.iter().zip(fetched) {
            let n_channels = source.channel_count();
            if buffer.is_empty() {
                let len = out_w as usize * out_h as usize;
                channels.extend(std::iter::repeat_with(|| vec![0.0; len]).take(n_channels));
                continue;
            }
            if (buffer.width(), buffer.height()) != (out_w, out_h)
                || buffer.channel_count() != n_channels
            {
                return Err(TransformError::incompatible(format!(
                    "source '{}' returned {}x{} with {} channels, expected {}x{} with {}",
                    source.metadata().name,
                    buffer.width(),
                    buffer.height(),
                    buffer.channel_count(),
                    out_w,
                    out_h,
                    n_channels
                )));
            }
            channels.extend(buffer.into_channels());
        }

        PixelBuffer::new(out_w, out_h, self.metadata.pixel_type, channels)
            .ok_or_else(|| TransformError::incompatible("concatenated channel length mismatch"))
    }

    fn wrapped(&self) -> Option<&SharedServer> {
        Some(&self.server)
    }

    /// Describes every non-primary source as a pipeline over the primary's
    /// base. `None` if a source is built on a different base.
    fn stage(&self) -> Option<StageSpec> {
        let base = base_server(&self.server);
        let mut sources = Vec::with_capacity(self.sources.len().saturating_sub(1));
        for (i, source) in self.sources.iter().enumerate() {
            if i == self.primary {
                continue;
            }
            if !same_server(base_server(source), base) {
                return None;
            }
            sources.push(PipelineSpec::describe(source).ok()?);
        }
        Some(StageSpec::ConcatChannels {
            sources,
            position: self.primary,
        })
    }
}
