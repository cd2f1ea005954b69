//! Turning a located face into the classifier's input tensor.
//!
//! The steps are fixed: clamp the detector box to the frame, reject faces under the
//! minimum size, crop, resize to the exact classifier resolution, convert channels,
//! scale samples into `[0, 1]` and lay the result out as `[1, H, W, C]`.

use std::fmt;

use emotion_utils::{
    bt601_luma,
    config::{AppSettings, ChannelMode, ResizeQuality},
    resize_filter, timing_guard,
};
use image::imageops;
use log::Level;
use ndarray::Array4;
use serde::Serialize;
use thiserror::Error;

use crate::{frame::Frame, postprocess::BoundingBox};

/// Spatial size and depth of a single face tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl TensorShape {
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// `[1, H, W, C]`.
    pub fn dims(&self) -> [usize; 4] {
        [1, self.height, self.width, self.channels]
    }

    pub fn len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[1, {}, {}, {}]", self.height, self.width, self.channels)
    }
}

/// Face pixels ready for the classifier: shape `[1, H, W, C]`, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFaceTensor {
    data: Array4<f32>,
}

impl NormalizedFaceTensor {
    /// All-zero tensor, used to probe classifiers at load time.
    pub fn zeros(shape: TensorShape) -> Self {
        Self {
            data: Array4::zeros(shape.dims()),
        }
    }

    /// Wrap an existing batch-of-one array.
    ///
    /// Returns `None` when the batch dimension is not 1 or a value falls outside `[0, 1]`.
    pub fn from_array(data: Array4<f32>) -> Option<Self> {
        let in_range = data.iter().all(|value| (0.0..=1.0).contains(value));
        (data.dim().0 == 1 && in_range).then(|| Self {
            data: data.as_standard_layout().into_owned(),
        })
    }

    pub fn shape(&self) -> TensorShape {
        let (_, height, width, channels) = self.data.dim();
        TensorShape::new(height, width, channels)
    }

    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    /// Samples in row-major `[1, H, W, C]` order.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }
}

/// Integer pixel rectangle that lies entirely inside its source frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FaceBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl FaceBox {
    /// Intersect a fractional detector box with a `frame_width x frame_height` frame.
    ///
    /// Edges are rounded to the nearest pixel and then clamped, so the result always
    /// satisfies `x + width <= frame_width` and `y + height <= frame_height`. Boxes with
    /// non-finite coordinates collapse to an empty box at the origin.
    pub fn clamp_from(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Self {
        let (x, width) = clamp_span(bbox.x, bbox.width, frame_width);
        let (y, height) = clamp_span(bbox.y, bbox.height, frame_height);
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// `[x, y, width, height]`.
    pub fn to_array(&self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

fn clamp_span(start: f32, length: f32, extent: u32) -> (u32, u32) {
    let end = start + length;
    if !start.is_finite() || !end.is_finite() {
        return (0, 0);
    }
    let limit = extent as f32;
    let lo = start.round().clamp(0.0, limit);
    let hi = end.round().clamp(lo, limit);
    let lo = lo as u32;
    (lo, (hi as u32).saturating_sub(lo).min(extent - lo))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    #[error("face region {width}x{height} is below the {min}px minimum")]
    FaceTooSmall { width: u32, height: u32, min: u32 },
    #[error("classifier input shape {0} has a zero dimension")]
    InvalidShape(TensorShape),
}

/// Parameters of the region normalizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionConfig {
    /// Classifier spatial size; `channels` is overridden by `channel_mode`.
    pub output: TensorShape,
    pub channel_mode: ChannelMode,
    /// Faces narrower or shorter than this after clamping are rejected.
    pub min_face_size: u32,
    pub resize_quality: ResizeQuality,
}

impl Default for RegionConfig {
    fn default() -> Self {
        (&AppSettings::default()).into()
    }
}

impl From<&AppSettings> for RegionConfig {
    fn from(settings: &AppSettings) -> Self {
        let classifier = &settings.classifier;
        Self {
            output: TensorShape::new(
                classifier.input_height as usize,
                classifier.input_width as usize,
                classifier.channels.channels(),
            ),
            channel_mode: classifier.channels,
            min_face_size: settings.region.min_face_size,
            resize_quality: settings.region.resize_quality,
        }
    }
}

/// A normalized face and the clamped box it was cut from.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFace {
    pub face_box: FaceBox,
    pub tensor: NormalizedFaceTensor,
}

/// Stateless crop-and-normalize stage between the locator and the classifier.
#[derive(Debug, Clone)]
pub struct RegionPreprocessor {
    config: RegionConfig,
}

impl RegionPreprocessor {
    pub fn new(config: RegionConfig) -> Result<Self, RegionError> {
        let mut config = config;
        config.output.channels = config.channel_mode.channels();
        if config.output.is_empty() {
            return Err(RegionError::InvalidShape(config.output));
        }
        Ok(Self { config })
    }

    /// Shape of every tensor this preprocessor produces.
    pub fn output_shape(&self) -> TensorShape {
        self.config.output
    }

    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    pub fn prepare(&self, frame: &Frame, bbox: &BoundingBox) -> Result<PreparedFace, RegionError> {
        let _guard = timing_guard("emotion_core::prepare_region", Level::Debug);
        let (frame_w, frame_h) = frame.dimensions();
        let face_box = FaceBox::clamp_from(bbox, frame_w, frame_h);

        let min = self.config.min_face_size.max(1);
        if face_box.width < min || face_box.height < min {
            return Err(RegionError::FaceTooSmall {
                width: face_box.width,
                height: face_box.height,
                min: self.config.min_face_size,
            });
        }

        let crop = frame.region_to_rgb(face_box.x, face_box.y, face_box.width, face_box.height);
        let TensorShape {
            height, width, ..
        } = self.config.output;
        let resized = imageops::resize(
            &crop,
            width as u32,
            height as u32,
            resize_filter(self.config.resize_quality),
        );

        let mode = self.config.channel_mode;
        let mut data = Array4::<f32>::zeros(self.config.output.dims());
        for (x, y, pixel) in resized.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let (xi, yi) = (x as usize, y as usize);
            match mode {
                ChannelMode::Grayscale => {
                    data[(0, yi, xi, 0)] = scale(bt601_luma(r, g, b));
                }
                ChannelMode::Rgb => {
                    data[(0, yi, xi, 0)] = scale(r);
                    data[(0, yi, xi, 1)] = scale(g);
                    data[(0, yi, xi, 2)] = scale(b);
                }
                ChannelMode::Bgr => {
                    data[(0, yi, xi, 0)] = scale(b);
                    data[(0, yi, xi, 1)] = scale(g);
                    data[(0, yi, xi, 2)] = scale(r);
                }
            }
        }

        Ok(PreparedFace {
            face_box,
            tensor: NormalizedFaceTensor { data },
        })
    }
}

#[inline]
fn scale(sample: u8) -> f32 {
    sample as f32 / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn preprocessor(mode: ChannelMode, min_face_size: u32) -> RegionPreprocessor {
        RegionPreprocessor::new(RegionConfig {
            output: TensorShape::new(8, 8, mode.channels()),
            channel_mode: mode,
            min_face_size,
            resize_quality: ResizeQuality::Quality,
        })
        .expect("valid config")
    }

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        Frame::from_rgb_image(&RgbImage::from_pixel(width, height, image::Rgb(rgb))).unwrap()
    }

    #[test]
    fn clamp_keeps_box_inside_frame() {
        let clamped = FaceBox::clamp_from(&BoundingBox::new(-10.4, 20.6, 50.0, 500.0), 40, 100);
        assert_eq!(
            clamped,
            FaceBox {
                x: 0,
                y: 21,
                width: 40,
                height: 79
            }
        );

        let outside = FaceBox::clamp_from(&BoundingBox::new(120.0, 5.0, 10.0, 10.0), 100, 100);
        assert_eq!(outside.x, 100);
        assert!(outside.is_empty());

        let nan = FaceBox::clamp_from(&BoundingBox::new(f32::NAN, 0.0, 10.0, 10.0), 100, 100);
        assert_eq!((nan.x, nan.width), (0, 0));
    }

    #[test]
    fn rejects_faces_below_minimum() {
        let frame = solid_frame(100, 100, [128, 128, 128]);
        let err = preprocessor(ChannelMode::Grayscale, 48)
            .prepare(&frame, &BoundingBox::new(10.0, 10.0, 47.0, 80.0))
            .expect_err("too narrow");
        assert_eq!(
            err,
            RegionError::FaceTooSmall {
                width: 47,
                height: 80,
                min: 48
            }
        );
    }

    #[test]
    fn clamping_happens_before_the_size_check() {
        let frame = solid_frame(100, 100, [128, 128, 128]);
        // 60px wide on paper but only 20px remain inside the frame.
        let result = preprocessor(ChannelMode::Grayscale, 48)
            .prepare(&frame, &BoundingBox::new(80.0, 0.0, 60.0, 60.0));
        assert!(matches!(
            result,
            Err(RegionError::FaceTooSmall { width: 20, .. })
        ));
    }

    #[test]
    fn grayscale_output_is_scaled_luma() {
        let frame = solid_frame(64, 64, [255, 0, 0]);
        let prepared = preprocessor(ChannelMode::Grayscale, 16)
            .prepare(&frame, &BoundingBox::new(0.0, 0.0, 64.0, 64.0))
            .expect("prepare");

        assert_eq!(prepared.tensor.shape(), TensorShape::new(8, 8, 1));
        assert_eq!(prepared.tensor.as_array().shape(), &[1, 8, 8, 1]);
        let expected = 76.0 / 255.0;
        assert!(
            prepared
                .tensor
                .as_array()
                .iter()
                .all(|v| (v - expected).abs() < 1e-6)
        );
    }

    #[test]
    fn color_modes_order_channels() {
        let frame = solid_frame(32, 32, [255, 128, 0]);
        let bbox = BoundingBox::new(0.0, 0.0, 32.0, 32.0);

        let rgb = preprocessor(ChannelMode::Rgb, 8)
            .prepare(&frame, &bbox)
            .expect("rgb");
        assert_eq!(rgb.tensor.shape(), TensorShape::new(8, 8, 3));
        assert_eq!(&rgb.tensor.to_vec()[..3], &[1.0, 128.0 / 255.0, 0.0]);

        let bgr = preprocessor(ChannelMode::Bgr, 8)
            .prepare(&frame, &bbox)
            .expect("bgr");
        assert_eq!(&bgr.tensor.to_vec()[..3], &[0.0, 128.0 / 255.0, 1.0]);
    }

    #[test]
    fn output_shape_is_constant_across_face_sizes() {
        let frame = solid_frame(300, 200, [10, 200, 30]);
        let stage = preprocessor(ChannelMode::Rgb, 8);
        for bbox in [
            BoundingBox::new(0.0, 0.0, 300.0, 200.0),
            BoundingBox::new(50.0, 20.0, 9.0, 120.0),
            BoundingBox::new(-30.0, -30.0, 90.0, 60.0),
        ] {
            let prepared = stage.prepare(&frame, &bbox).expect("prepare");
            assert_eq!(prepared.tensor.shape(), stage.output_shape());
            assert!(prepared.tensor.as_array().iter().all(|v| (0.0..=1.0).contains(v)));
        }
    }

    #[test]
    fn channel_count_follows_mode() {
        let stage = RegionPreprocessor::new(RegionConfig {
            output: TensorShape::new(48, 48, 3),
            channel_mode: ChannelMode::Grayscale,
            min_face_size: 48,
            resize_quality: ResizeQuality::Speed,
        })
        .expect("valid");
        assert_eq!(stage.output_shape(), TensorShape::new(48, 48, 1));

        let invalid = RegionPreprocessor::new(RegionConfig {
            output: TensorShape::new(0, 48, 1),
            ..*stage.config()
        });
        assert!(matches!(invalid, Err(RegionError::InvalidShape(_))));
    }

    #[test]
    fn from_array_validates_range_and_batch() {
        assert!(NormalizedFaceTensor::from_array(Array4::zeros((1, 2, 2, 1))).is_some());
        assert!(NormalizedFaceTensor::from_array(Array4::zeros((2, 2, 2, 1))).is_none());
        assert!(NormalizedFaceTensor::from_array(Array4::from_elem((1, 2, 2, 1), 1.5)).is_none());
    }
}
