use std::borrow::Cow;

use anyhow::Result;
use emotion_utils::{
    compute_resize_scales,
    config::{InputDimensions, ResizeQuality},
    resize_filter, rgb_to_bgr_chw, timing_guard,
};
use image::{DynamicImage, RgbImage, imageops};
use tract_onnx::prelude::Tensor;

use crate::frame::Frame;

/// Face detector input resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

impl InputSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for InputSize {
    fn default() -> Self {
        Self::new(640, 640)
    }
}

/// How frames are scaled into the face detector input.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreprocessConfig {
    pub input_size: InputSize,
    pub resize_quality: ResizeQuality,
}

impl From<InputDimensions> for PreprocessConfig {
    fn from(dimensions: InputDimensions) -> Self {
        Self {
            input_size: InputSize::new(dimensions.width, dimensions.height),
            resize_quality: dimensions.resize_quality,
        }
    }
}

impl From<&InputDimensions> for PreprocessConfig {
    fn from(dimensions: &InputDimensions) -> Self {
        (*dimensions).into()
    }
}

/// Detector-ready tensor plus the factors mapping detections back to the frame.
#[derive(Debug)]
pub struct PreprocessOutput {
    pub tensor: Tensor,
    pub scale_x: f32,
    pub scale_y: f32,
}

/// Build the `[1, 3, H, W]` BGR float blob YuNet expects, with raw 0-255 samples.
pub fn preprocess_frame(frame: &Frame, config: &PreprocessConfig) -> Result<PreprocessOutput> {
    let _guard = timing_guard("emotion_core::locator_preprocess", log::Level::Trace);
    let InputSize {
        width: input_w,
        height: input_h,
    } = config.input_size;
    anyhow::ensure!(
        input_w > 0 && input_h > 0,
        "detector input dimensions must be greater than zero"
    );

    let (orig_w, orig_h) = frame.dimensions();
    let rgb = frame.to_rgb_image();
    let resized: Cow<'_, RgbImage> = if (orig_w, orig_h) == (input_w, input_h) {
        Cow::Borrowed(&rgb)
    } else {
        Cow::Owned(imageops::resize(
            &rgb,
            input_w,
            input_h,
            resize_filter(config.resize_quality),
        ))
    };

    let chw = rgb_to_bgr_chw(&resized);
    let (data, _) = chw.into_raw_vec_and_offset();
    let tensor = Tensor::from_shape(&[1, 3, input_h as usize, input_w as usize], &data)
        .map_err(|e| anyhow::anyhow!("failed to build detector tensor: {e}"))?;

    let (scale_x, scale_y) = compute_resize_scales((orig_w, orig_h), (input_w, input_h))?;
    Ok(PreprocessOutput {
        tensor,
        scale_x,
        scale_y,
    })
}

/// Convenience wrapper for callers holding a decoded image rather than a [`Frame`].
pub fn preprocess_dynamic_image(
    image: &DynamicImage,
    config: &PreprocessConfig,
) -> Result<PreprocessOutput> {
    let frame = Frame::from_dynamic_image(image)?;
    preprocess_frame(&frame, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_nchw_tensor_and_scales() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, image::Rgb([1, 2, 3])));
        let config = PreprocessConfig {
            input_size: InputSize::new(64, 32),
            resize_quality: ResizeQuality::Speed,
        };

        let output = preprocess_dynamic_image(&image, &config).expect("preprocess");
        assert_eq!(output.tensor.shape(), &[1, 3, 32, 64]);
        assert_eq!((output.scale_x, output.scale_y), (200.0 / 64.0, 100.0 / 32.0));

        let data = output.tensor.as_slice::<f32>().unwrap();
        // Blue plane first.
        assert_eq!(data[0], 3.0);
        assert_eq!(data[64 * 32], 2.0);
        assert_eq!(data[2 * 64 * 32], 1.0);
    }

    #[test]
    fn rejects_zero_input_size() {
        let frame = Frame::from_rgb_image(&RgbImage::new(4, 4)).unwrap();
        let config = PreprocessConfig {
            input_size: InputSize::new(0, 32),
            ..Default::default()
        };
        assert!(preprocess_frame(&frame, &config).is_err());
    }

    #[test]
    fn converts_input_dimensions() {
        let config: PreprocessConfig = InputDimensions {
            width: 320,
            height: 240,
            resize_quality: ResizeQuality::Quality,
        }
        .into();
        assert_eq!(config.input_size, InputSize::new(320, 240));
        assert_eq!(config.resize_quality, ResizeQuality::Quality);
    }
}
