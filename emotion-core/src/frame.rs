//! Decoded color frames handed to the pipeline.

use image::{DynamicImage, RgbImage};
use ndarray::{Array3, ArrayView3, Axis, s};
use thiserror::Error;

/// Reasons a pixel buffer cannot be used as a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has zero extent ({width}x{height})")]
    Empty { width: usize, height: usize },
    #[error("frame must have exactly 3 color channels, got {0}")]
    Channels(usize),
}

/// An `H x W x 3` image with 8-bit samples in B, G, R order.
///
/// Construction validates the shape, so every `Frame` has a non-zero extent and exactly
/// three channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pixels: Array3<u8>,
}

impl Frame {
    /// Wrap an owned BGR array shaped `(height, width, 3)`.
    pub fn from_bgr_array(pixels: Array3<u8>) -> Result<Self, FrameError> {
        let (height, width, channels) = pixels.dim();
        if height == 0 || width == 0 {
            return Err(FrameError::Empty { width, height });
        }
        if channels != 3 {
            return Err(FrameError::Channels(channels));
        }
        Ok(Self {
            pixels: pixels.as_standard_layout().into_owned(),
        })
    }

    /// Copy a borrowed BGR view.
    pub fn from_bgr_view(pixels: ArrayView3<'_, u8>) -> Result<Self, FrameError> {
        Self::from_bgr_array(pixels.to_owned())
    }

    /// Build a frame from an RGB image, swapping to BGR.
    pub fn from_rgb_image(image: &RgbImage) -> Result<Self, FrameError> {
        let (width, height) = image.dimensions();
        let mut pixels = Array3::<u8>::zeros((height as usize, width as usize, 3));
        for (x, y, pixel) in image.enumerate_pixels() {
            let (xi, yi) = (x as usize, y as usize);
            pixels[(yi, xi, 0)] = pixel[2];
            pixels[(yi, xi, 1)] = pixel[1];
            pixels[(yi, xi, 2)] = pixel[0];
        }
        Self::from_bgr_array(pixels)
    }

    /// Build a frame from any decoded image; alpha is dropped.
    pub fn from_dynamic_image(image: &DynamicImage) -> Result<Self, FrameError> {
        match image.as_rgb8() {
            Some(rgb) => Self::from_rgb_image(rgb),
            None => Self::from_rgb_image(&image.to_rgb8()),
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.dim().1 as u32
    }

    pub fn height(&self) -> u32 {
        self.pixels.dim().0 as u32
    }

    /// `(width, height)` in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    /// Borrow the raw `(height, width, 3)` BGR samples.
    pub fn as_bgr(&self) -> ArrayView3<'_, u8> {
        self.pixels.view()
    }

    /// Copy the frame into an RGB image.
    pub fn to_rgb_image(&self) -> RgbImage {
        self.region_to_rgb(0, 0, self.width(), self.height())
    }

    /// Copy the `width x height` region at `(x, y)` into an RGB image.
    ///
    /// The region must lie inside the frame.
    pub(crate) fn region_to_rgb(&self, x: u32, y: u32, width: u32, height: u32) -> RgbImage {
        let (x, y) = (x as usize, y as usize);
        let view = self.pixels.slice(s![
            y..y + height as usize,
            x..x + width as usize,
            ..
        ]);
        let mut raw = Vec::with_capacity(view.len());
        for row in view.axis_iter(Axis(0)) {
            for pixel in row.axis_iter(Axis(0)) {
                raw.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
            }
        }
        RgbImage::from_raw(width, height, raw).unwrap_or_else(|| RgbImage::new(width, height))
    }
}

impl TryFrom<&DynamicImage> for Frame {
    type Error = FrameError;

    fn try_from(image: &DynamicImage) -> Result<Self, Self::Error> {
        Self::from_dynamic_image(image)
    }
}
