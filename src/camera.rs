// src/camera.rs
//
// Image front end for the perception loop: decode the compressed
// camera frame, resize square to the model input (aspect ratio is
// deliberately not preserved, matching how the detector was trained)
// and lay it out as normalized CHW floats.

use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbImage;

pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage> {
    let img = image::load_from_memory(bytes).context("could not decode camera frame")?;
    Ok(img.to_rgb8())
}

pub fn resize_square(img: &RgbImage, size: u32) -> RgbImage {
    if img.width() == size && img.height() == size {
        return img.clone();
    }
    image::imageops::resize(img, size, size, FilterType::Triangle)
}

/// HWC u8 → CHW f32 in [0, 1].
pub fn to_chw(img: &RgbImage) -> Vec<f32> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let raw = img.as_raw();
    let mut out = vec![0.0f32; 3 * h * w];
    for c in 0..3 {
        for y in 0..h {
            for x in 0..w {
                out[c * h * w + y * w + x] = raw[(y * w + x) * 3 + c] as f32 / 255.0;
            }
        }
    }
    out
}
