//! Color deconvolution stage.
//!
//! Converts an 8-bit RGB brightfield image into one `Float32` channel per
//! selected stain, holding that stain's concentration in OD units.

use async_trait::async_trait;
use tracing::debug;

use crate::color::{ColorDeconvolutionStains, StainMatrix, StainVector};
use crate::error::TransformError;
use crate::region::RegionRequest;
use crate::source::{
    ImageChannel, ImageServer, ImageServerMetadata, PixelBuffer, PixelType, SharedServer,
};

use super::{derive_id, StageSpec};

/// Stage exposing deconvolved stains as channels.
#[derive(Debug)]
pub struct ColorDeconvolutionServer {
    server: SharedServer,
    stains: ColorDeconvolutionStains,
    stain_numbers: Vec<usize>,
    matrix: StainMatrix,
    metadata: ImageServerMetadata,
    id: String,
}

impl ColorDeconvolutionServer {
    /// Deconvolve with `stains`, keeping the 1-based `stain_numbers`.
    ///
    /// An empty `stain_numbers` selects every non-residual stain.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPixelType` unless the upstream is 8-bit RGB, and
    /// `InvalidParameter` for stain numbers outside 1..=3 or stain vectors
    /// that cannot be inverted.
    pub fn new(
        server: SharedServer,
        stains: ColorDeconvolutionStains,
        stain_numbers: &[usize],
    ) -> Result<Self, TransformError> {
        let upstream = server.metadata();
        if !upstream.is_rgb_uint8() {
            return Err(TransformError::unsupported(format!(
                "color deconvolution requires 8-bit RGB, '{}' has {} {:?} channels",
                upstream.name,
                upstream.channel_count(),
                upstream.pixel_type
            )));
        }

        let stain_numbers = if stain_numbers.is_empty() {
            stains.default_stain_numbers()
        } else {
            stain_numbers.to_vec()
        };

        let mut channels = Vec::with_capacity(stain_numbers.len());
        for &n in &stain_numbers {
            let stain = stains.stain(n).ok_or_else(|| {
                TransformError::invalid_parameter(format!(
                    "stain number {} is outside 1..=3",
                    n
                ))
            })?;
            channels.push(ImageChannel::new(stain.name.clone(), stain_color(stain)));
        }

        let matrix = stains.matrix()?;
        let metadata = upstream
            .clone()
            .with_channels(channels)
            .with_pixel_type(PixelType::Float32)
            .with_rgb(false);
        let id = derive_id(
            &[&server],
            &StageSpec::ColorDeconvolution {
                stains: stains.clone(),
                stain_numbers: stain_numbers.clone(),
            },
        );

        debug!(
            upstream = %upstream.name,
            stains = %stains.name,
            ?stain_numbers,
            "created color deconvolution stage"
        );

        Ok(Self {
            server,
            stains,
            stain_numbers,
            matrix,
            metadata,
            id,
        })
    }

    pub fn stains(&self) -> &ColorDeconvolutionStains {
        &self.stains
    }

    pub fn stain_numbers(&self) -> &[usize] {
        &self.stain_numbers
    }
}

/// Display color of a stain: the RGB it absorbs least.
fn stain_color(stain: &StainVector) -> u32 {
    let component = |v: f64| (255.0 - (v * 255.0).clamp(0.0, 255.0)).round() as u32;
    (component(stain.r) << 16) | (component(stain.g) << 8) | component(stain.b)
}

#[async_trait]
impl ImageServer for ColorDeconvolutionServer {
    fn metadata(&self) -> &ImageServerMetadata {
        &self.metadata
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    async fn read_region(&self, request: &RegionRequest) -> Result<PixelBuffer, TransformError> {
        self.validate_request(request)?;
        let fetched = self.server.read_region(request).await?;
        if fetched.pixel_type() != PixelType::Uint8 || fetched.channel_count() != 3 {
            return Err(TransformError::unsupported(format!(
                "color deconvolution received {} {:?} channels",
                fetched.channel_count(),
                fetched.pixel_type()
            )));
        }

        let (width, height) = (fetched.width(), fetched.height());
        let mut out = PixelBuffer::zeros(width, height, self.stain_numbers.len(), PixelType::Float32);
        let [r, g, b] = [fetched.channel(0), fetched.channel(1), fetched.channel(2)];

        for y in 0..height {
            for x in 0..width {
                let i = (y * width + x) as usize;
                let c = self.matrix.deconvolve([r[i], g[i], b[i]]);
                for (k, &n) in self.stain_numbers.iter().enumerate() {
                    out.set(x, y, k, c[n - 1] as f32);
                }
            }
        }

        Ok(out)
    }

    fn wrapped(&self) -> Option<&SharedServer> {
        Some(&self.server)
    }

    fn stage(&self) -> Option<StageSpec> {
        Some(StageSpec::ColorDeconvolution {
            stains: self.stains.clone(),
            stain_numbers: self.stain_numbers.clone(),
        })
    }
}
