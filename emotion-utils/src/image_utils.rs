use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, RgbImage, imageops::FilterType};
use ndarray::Array3;

use crate::config::ResizeQuality;

/// Load an image from disk into memory.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path_ref = path.as_ref();
    image::open(path_ref).with_context(|| format!("failed to open image {}", path_ref.display()))
}

/// Decode an encoded image (PNG, JPEG, BMP, WebP) held in memory.
pub fn decode_image_bytes(bytes: &[u8]) -> Result<DynamicImage> {
    anyhow::ensure!(!bytes.is_empty(), "image payload is empty");
    let format = image::guess_format(bytes).context("unrecognized image encoding")?;
    image::load_from_memory_with_format(bytes, format)
        .with_context(|| format!("failed to decode {format:?} image"))
}

/// Resampling filter for a [`ResizeQuality`].
pub fn resize_filter(quality: ResizeQuality) -> FilterType {
    match quality {
        ResizeQuality::Quality => FilterType::Triangle,
        ResizeQuality::Speed => FilterType::Nearest,
    }
}

/// Convert an RGB image into a planar BGR array (`[3, H, W]`) with raw 0-255 samples.
///
/// This matches the blob OpenCV feeds to YuNet.
pub fn rgb_to_bgr_chw(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut array = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (xi, yi) = (x as usize, y as usize);
        array[(0, yi, xi)] = pixel[2] as f32;
        array[(1, yi, xi)] = pixel[1] as f32;
        array[(2, yi, xi)] = pixel[0] as f32;
    }
    array
}

/// Scale factors mapping resized coordinates back onto the original image.
pub fn compute_resize_scales(original: (u32, u32), target: (u32, u32)) -> Result<(f32, f32)> {
    let (orig_w, orig_h) = original;
    let (target_w, target_h) = target;
    anyhow::ensure!(
        target_w > 0 && target_h > 0,
        "target dimensions must be non-zero"
    );
    anyhow::ensure!(
        orig_w > 0 && orig_h > 0,
        "original dimensions must be non-zero"
    );
    Ok((
        orig_w as f32 / target_w as f32,
        orig_h as f32 / target_h as f32,
    ))
}

/// 8-bit luma with ITU-R BT.601 weights, rounded like OpenCV's `BGR2GRAY`.
#[inline]
pub fn bt601_luma(red: u8, green: u8, blue: u8) -> u8 {
    let luma = 0.299f32.mul_add(
        red as f32,
        0.587f32.mul_add(green as f32, 0.114 * blue as f32),
    );
    luma.round().clamp(0.0, 255.0) as u8
}
