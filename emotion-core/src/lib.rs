//! Emotion detection core.
//!
//! A [`Pipeline`] takes a decoded [`Frame`], finds the most prominent face with a
//! [`FaceLocator`] (YuNet via `tract-onnx` by default), normalizes that region into the
//! classifier's input tensor and returns a [`DetectionResult`]: the predominant emotion
//! with its per-label scores, or the reason no emotion could be reported.

/// Emotion classifiers and score normalization.
pub mod classifier;
/// Validated BGR frames.
pub mod frame;
/// Ordered emotion label table.
pub mod labels;
/// Face locator trait and the YuNet implementation.
pub mod locator;
/// ONNX model loading and the YuNet graph.
pub mod model;
/// The detection pipeline.
pub mod pipeline;
/// Detector post-processing (score filtering, NMS).
pub mod postprocess;
/// Detector input preprocessing.
pub mod preprocess;
/// Face region cropping and normalization.
pub mod region;
/// Detection outcomes.
pub mod result;
/// Per-label emotion scores.
pub mod scores;

pub use classifier::{
    ClassifierConfig, EmotionClassifier, OnnxEmotionClassifier, softmax, stable_argmax,
};
pub use frame::{Frame, FrameError};
pub use labels::{LabelTable, LabelTableError};
pub use locator::{FaceLocator, LocatedFace, YuNetLocator};
pub use model::YuNetModel;
pub use pipeline::{Pipeline, PipelineError, SharedPipeline};
pub use postprocess::{BoundingBox, PostprocessConfig};
pub use preprocess::{InputSize, PreprocessConfig, PreprocessOutput, preprocess_dynamic_image};
pub use region::{
    FaceBox, NormalizedFaceTensor, PreparedFace, RegionConfig, RegionError, RegionPreprocessor,
    TensorShape,
};
pub use result::{DetectionResult, EmotionDetection, NotDetectedReason};
pub use scores::{EmotionScores, ScoreCountMismatch};

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
