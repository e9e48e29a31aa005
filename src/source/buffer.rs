//! Request-scoped pixel buffers.
//!
//! A [`PixelBuffer`] holds the samples returned for a single region request.
//! Samples are stored channel-planar as `f32` regardless of the declared
//! [`PixelType`]; the declared type tells consumers which value range the
//! samples are meant to occupy.

use image::{DynamicImage, GrayImage, RgbImage};

use super::metadata::PixelType;

/// Channel-planar pixel samples for one region.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixel_type: PixelType,
    channels: Vec<Vec<f32>>,
}

impl PixelBuffer {
    /// Build a buffer from per-channel sample planes.
    ///
    /// Returns `None` if any plane does not hold `width * height` samples.
    pub fn new(
        width: u32,
        height: u32,
        pixel_type: PixelType,
        channels: Vec<Vec<f32>>,
    ) -> Option<Self> {
        let len = width as usize * height as usize;
        if channels.iter().any(|c| c.len() != len) {
            return None;
        }
        Some(Self {
            width,
            height,
            pixel_type,
            channels,
        })
    }

    /// A zero-filled buffer.
    pub fn zeros(width: u32, height: u32, n_channels: usize, pixel_type: PixelType) -> Self {
        let len = width as usize * height as usize;
        Self {
            width,
            height,
            pixel_type,
            channels: vec![vec![0.0; len]; n_channels],
        }
    }

    /// A zero-sized buffer that still declares its channel layout.
    pub fn empty(n_channels: usize, pixel_type: PixelType) -> Self {
        Self::zeros(0, 0, n_channels, pixel_type)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Sample at `(x, y)` in `channel`. Panics if out of bounds.
    #[inline]
    pub fn get(&self, x: u32, y: u32, channel: usize) -> f32 {
        self.channels[channel][self.offset(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, channel: usize, value: f32) {
        let offset = self.offset(x, y);
        self.channels[channel][offset] = value;
    }

    /// All samples of one channel, row-major.
    pub fn channel(&self, channel: usize) -> &[f32] {
        &self.channels[channel]
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Every channel's sample at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Vec<f32> {
        let offset = self.offset(x, y);
        self.channels.iter().map(|c| c[offset]).collect()
    }

    /// Re-declare the pixel type, rounding and clamping integer targets.
    pub fn clamp_to_pixel_type(mut self, pixel_type: PixelType) -> Self {
        if !pixel_type.is_float() {
            for channel in &mut self.channels {
                for v in channel.iter_mut() {
                    *v = pixel_type.clamp(*v);
                }
            }
        }
        self.pixel_type = pixel_type;
        self
    }

    /// Copy `other` into this buffer with its top-left corner at `(dx, dy)`.
    ///
    /// Samples falling outside this buffer are dropped. Channel counts must
    /// match; extra channels on either side are ignored.
    pub fn paste(&mut self, other: &PixelBuffer, dx: i64, dy: i64) {
        let n = self.channels.len().min(other.channels.len());
        for y in 0..other.height {
            let ty = dy + y as i64;
            if ty < 0 || ty >= self.height as i64 {
                continue;
            }
            for x in 0..other.width {
                let tx = dx + x as i64;
                if tx < 0 || tx >= self.width as i64 {
                    continue;
                }
                let src = other.offset(x, y);
                let dst = self.offset(tx as u32, ty as u32);
                for c in 0..n {
                    self.channels[c][dst] = other.channels[c][src];
                }
            }
        }
    }

    // =========================================================================
    // image crate interop
    // =========================================================================

    /// Convert a decoded image into a buffer.
    ///
    /// 8-bit images keep their channel count (alpha dropped); 16-bit images
    /// become `Uint16`; float images become `Float32`.
    pub fn from_dynamic_image(image: &DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Self::from_gray_image(gray),
            DynamicImage::ImageLuma16(_) | DynamicImage::ImageLumaA16(_) => {
                let gray = image.to_luma16();
                let samples = gray.as_raw().iter().map(|&v| v as f32).collect();
                Self {
                    width: gray.width(),
                    height: gray.height(),
                    pixel_type: PixelType::Uint16,
                    channels: vec![samples],
                }
            }
            DynamicImage::ImageRgb16(_) | DynamicImage::ImageRgba16(_) => {
                let rgb = image.to_rgb16();
                Self::from_interleaved(
                    rgb.width(),
                    rgb.height(),
                    3,
                    PixelType::Uint16,
                    rgb.as_raw().iter().map(|&v| v as f32),
                )
            }
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
                let rgb = image.to_rgb32f();
                Self::from_interleaved(
                    rgb.width(),
                    rgb.height(),
                    3,
                    PixelType::Float32,
                    rgb.as_raw().iter().copied(),
                )
            }
            DynamicImage::ImageLumaA8(_) => Self::from_gray_image(&image.to_luma8()),
            _ => Self::from_rgb_image(&image.to_rgb8()),
        }
    }

    pub fn from_rgb_image(image: &RgbImage) -> Self {
        Self::from_interleaved(
            image.width(),
            image.height(),
            3,
            PixelType::Uint8,
            image.as_raw().iter().map(|&v| v as f32),
        )
    }

    pub fn from_gray_image(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            pixel_type: PixelType::Uint8,
            channels: vec![image.as_raw().iter().map(|&v| v as f32).collect()],
        }
    }

    fn from_interleaved(
        width: u32,
        height: u32,
        n_channels: usize,
        pixel_type: PixelType,
        samples: impl Iterator<Item = f32>,
    ) -> Self {
        let len = width as usize * height as usize;
        let mut channels = vec![Vec::with_capacity(len); n_channels];
        for (i, v) in samples.enumerate() {
            channels[i % n_channels].push(v);
        }
        Self {
            width,
            height,
            pixel_type,
            channels,
        }
    }

    /// Interpret the first three channels as 8-bit RGB.
    ///
    /// Returns `None` if the buffer has fewer than three channels.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if self.channels.len() < 3 {
            return None;
        }
        let len = self.width as usize * self.height as usize;
        let mut raw = Vec::with_capacity(len * 3);
        for i in 0..len {
            for c in 0..3 {
                raw.push(self.channels[c][i].round().clamp(0.0, 255.0) as u8);
            }
        }
        RgbImage::from_raw(self.width, self.height, raw)
    }
}
