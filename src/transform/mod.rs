//! Transform stages and pipeline construction.
//!
//! Each stage decorates an upstream [`ImageServer`](crate::source::ImageServer)
//! and presents the same interface, computing its pixels lazily on every
//! `read_region` call.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │ TransformedServerBuilder │◄───────│  PipelineSpec (JSON)     │
//! └────────────┬─────────────┘ build  └──────────────────────────┘
//!              │ wraps                          ▲ describe
//!              ▼                                │
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Crop │ Affine │ Deconvolve │ ReorderRgb │ Rotate │ Channels  │
//! │ Concat │ Normalize                                           │
//! └────────────┬─────────────────────────────────────────────────┘
//!              │ wrapped()
//!              ▼
//! ┌──────────────────────────┐
//! │       Base server        │
//! └──────────────────────────┘
//! ```
//!
//! # Stage identity
//!
//! A stage's id is derived from the ids of its upstream servers and its
//! construction parameters, so two stages with the same id produce the same
//! pixels. Tile caches key on it.

mod affine;
mod builder;
mod channels;
mod concat;
mod crop;
mod deconvolve;
mod normalized;
mod pipeline;
mod reorder;
mod rotate;

use sha2::{Digest, Sha256};

use crate::source::SharedServer;

pub use affine::{AffineTransform, AffineTransformServer};
pub use builder::TransformedServerBuilder;
pub use channels::ChannelTransformServer;
pub use concat::ConcatChannelsServer;
pub use crop::CroppedImageServer;
pub use deconvolve::ColorDeconvolutionServer;
pub use normalized::NormalizedImageServer;
pub use pipeline::{PipelineSpec, StageSpec};
pub use reorder::RearrangeRgbServer;
pub use rotate::{RotatedImageServer, Rotation};

/// Number of hex characters kept from the identity digest.
const ID_HEX_LEN: usize = 32;

/// Identity of a stage built from `upstreams` with parameters `stage`.
pub(crate) fn derive_id(upstreams: &[&SharedServer], stage: &StageSpec) -> String {
    let mut hasher = Sha256::new();
    for upstream in upstreams {
        hasher.update(upstream.id().as_bytes());
        hasher.update([0u8]);
    }
    match serde_json::to_vec(stage) {
        Ok(params) => hasher.update(&params),
        Err(_) => hasher.update(format!("{:?}", stage).as_bytes()),
    }

    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", stage.kind(), &digest[..ID_HEX_LEN])
}
