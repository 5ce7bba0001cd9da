//! Image files as network input.
//!
//! Images are decoded (PNG/JPEG/BMP/GIF), converted to grayscale, resized to
//! the configured dimensions and scaled to [0, 1], row by row, so pixel
//! `(x, y)` becomes input position `y * width + x`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Per-pixel standardization `(p - mean) / std`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: f64,
    pub std: f64,
}

impl Default for Normalization {
    /// MNIST training-set statistics.
    fn default() -> Self {
        Normalization { mean: 0.1307, std: 0.3081 }
    }
}

impl Normalization {
    pub fn apply(&self, pixels: &mut [f64]) {
        for p in pixels {
            *p = (*p - self.mean) / self.std;
        }
    }
}

/// Reads an image file and turns it into a network input, optionally
/// normalized.
pub fn load_image_input(path: &Path, width: u32, height: u32, normalization: Option<Normalization>) -> Result<Vec<f64>> {
    let img = image::open(path)?;
    let mut pixels = grayscale_pixels(img, width, height);
    if let Some(n) = normalization {
        n.apply(&mut pixels);
    }
    Ok(pixels)
}

fn grayscale_pixels(img: image::DynamicImage, width: u32, height: u32) -> Vec<f64> {
    let resized = img.resize_exact(width, height, image::imageops::FilterType::Lanczos3);
    resized.to_luma8().pixels().map(|p| p.0[0] as f64 / 255.0).collect()
}
