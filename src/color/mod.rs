//! Color math shared by the channel and stain stages.
//!
//! - [`ColorTransform`]: derive one scalar channel from a pixel (channel
//!   extraction or min/mean/max projection)
//! - [`ColorDeconvolutionStains`]: stain vectors and OD-space matrices used
//!   for color deconvolution and stain normalization

mod stains;
mod transforms;

pub use stains::{from_od, od, ColorDeconvolutionStains, StainMatrix, StainVector};
pub use transforms::{ColorTransform, ResolvedTransform};
