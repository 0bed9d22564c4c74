use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat};
use ndarray::Array4;

use crate::config::PreprocessingConfig;

#[derive(Debug, thiserror::Error)]
#[error("Failed to process image file. Please ensure the file is a valid image. Error: {0}")]
pub struct DecodeError(#[from] pub image::ImageError);

/// Turns image bytes into the normalized NCHW batch the network was trained on.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    input_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
    filter: FilterType,
}

impl Preprocessor {
    pub fn new(input_size: u32, mean: [f32; 3], std: [f32; 3], filter: FilterType) -> Self {
        Self {
            input_size,
            mean,
            std,
            filter,
        }
    }

    pub fn from_config(config: &PreprocessingConfig) -> Self {
        Self::new(
            config.input_size,
            config.mean,
            config.std,
            config.resize_method.filter(),
        )
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn preprocess(&self, bytes: &[u8], format: ImageFormat) -> Result<Array4<f32>, DecodeError> {
        let image = image::load_from_memory_with_format(bytes, format)?;
        Ok(self.preprocess_image(&image))
    }

    /// Stretches to `input_size` square (no crop), then applies
    /// `(pixel / 255 - mean_c) / std_c` per channel.
    pub fn preprocess_image(&self, image: &DynamicImage) -> Array4<f32> {
        let rgb = image.to_rgb8();
        let side = self.input_size;
        let resized = imageops::resize(&rgb, side, side, self.filter);

        let side = side as usize;
        Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let value = resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0;
            (value - self.mean[c]) / self.std[c]
        })
    }
}
