use std::path::PathBuf;

use image::{DynamicImage, imageops::FilterType};
use thiserror::Error;

/// Failures while turning one example into a feature.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Example index {0} is out of range")]
    OutOfRange(usize),
    #[error("Failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// How a decoded image is brought to the model's input size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScaleMode {
    /// Stretch to the target size.
    #[default]
    Fill,
    /// Scale the shorter side to fit, then crop the centre.
    CenterCrop,
}

/// Input size expected by the classifier backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureGeometry {
    pub width: u32,
    pub height: u32,
    pub scale: ScaleMode,
}

impl FeatureGeometry {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            scale: ScaleMode::Fill,
        }
    }

    pub(crate) fn fit(&self, image: &DynamicImage) -> DynamicImage {
        match self.scale {
            ScaleMode::Fill => image.resize_exact(self.width, self.height, FilterType::Triangle),
            ScaleMode::CenterCrop => {
                image.resize_to_fill(self.width, self.height, FilterType::Triangle)
            }
        }
    }
}

impl Default for FeatureGeometry {
    fn default() -> Self {
        Self::new(227, 227)
    }
}

/// RGB pixels in channel-major (CHW) order scaled to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl Feature {
    pub const CHANNELS: usize = 3;

    pub fn from_image(image: &DynamicImage) -> Self {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let plane = (width * height) as usize;
        let mut data = vec![0.0f32; plane * Self::CHANNELS];
        for (offset, pixel) in rgb.pixels().enumerate() {
            for channel in 0..Self::CHANNELS {
                data[channel * plane + offset] = f32::from(pixel[channel]) / 255.0;
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Build a feature from raw CHW values; `None` when the length is wrong.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Option<Self> {
        (data.len() == (width * height) as usize * Self::CHANNELS).then_some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(channels, height, width)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (Self::CHANNELS, self.height as usize, self.width as usize)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Mean value of each colour channel.
    pub fn channel_means(&self) -> [f32; 3] {
        let plane = (self.width * self.height) as usize;
        let mut means = [0.0f32; 3];
        if plane == 0 {
            return means;
        }
        for (channel, mean) in means.iter_mut().enumerate() {
            let values = &self.data[channel * plane..(channel + 1) * plane];
            *mean = values.iter().sum::<f32>() / plane as f32;
        }
        means
    }

    pub fn flipped_horizontal(&self) -> Self {
        self.remapped(|x, y, width, _| (width - 1 - x, y))
    }

    pub fn flipped_vertical(&self) -> Self {
        self.remapped(|x, y, _, height| (x, height - 1 - y))
    }

    fn remapped(&self, source: impl Fn(usize, usize, usize, usize) -> (usize, usize)) -> Self {
        let (width, height) = (self.width as usize, self.height as usize);
        let plane = width * height;
        let mut data = vec![0.0f32; self.data.len()];
        for channel in 0..Self::CHANNELS {
            for y in 0..height {
                for x in 0..width {
                    let (sx, sy) = source(x, y, width, height);
                    data[channel * plane + y * width + x] =
                        self.data[channel * plane + sy * width + sx];
                }
            }
        }
        Self {
            width: self.width,
            height: self.height,
            data,
        }
    }
}
