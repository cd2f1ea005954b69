//! Frame-in, result-out orchestration of locator, region preprocessor and classifier.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, PoisonError},
};

use emotion_utils::{config::AppSettings, timing_guard};
use log::{Level, debug, error, info, warn};
use ndarray::ArrayView3;
use thiserror::Error;

use crate::{
    classifier::{EmotionClassifier, OnnxEmotionClassifier},
    frame::Frame,
    labels::{LabelTable, LabelTableError},
    locator::{FaceLocator, YuNetLocator},
    region::{RegionConfig, RegionError, RegionPreprocessor, TensorShape},
    result::{DetectionResult, EmotionDetection, NotDetectedReason},
    scores::EmotionScores,
};

/// Allowed drift of a probability vector's sum away from 1.
const SUM_TOLERANCE: f32 = 1e-3;

/// Startup failures. Anything that goes wrong per frame is a [`NotDetectedReason`] instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("classifier has {classes} outputs but the label table has {labels} labels")]
    LabelCountMismatch { classes: usize, labels: usize },
    #[error("classifier expects input {classifier} but the region preprocessor produces {region}")]
    InputShapeMismatch {
        classifier: TensorShape,
        region: TensorShape,
    },
    #[error(transparent)]
    Labels(#[from] LabelTableError),
    #[error(transparent)]
    Region(#[from] RegionError),
    #[error("face locator could not be initialized: {0}")]
    Locator(String),
}

#[derive(Debug)]
enum ClassifierSlot {
    Ready(Box<dyn EmotionClassifier>),
    /// Load failed; every frame reports `model_unavailable`.
    Unavailable(String),
}

/// The emotion detection pipeline.
///
/// Owns its label table, locator, preprocessor and classifier. `detect` never panics
/// and never returns an error: every outcome is a [`DetectionResult`]. The pipeline is
/// `Send` but not assumed `Sync`; share it across threads with [`SharedPipeline`] or
/// build one per worker.
#[derive(Debug)]
pub struct Pipeline {
    labels: LabelTable,
    locator: Box<dyn FaceLocator>,
    preprocessor: RegionPreprocessor,
    classifier: ClassifierSlot,
}

impl Pipeline {
    /// Assemble a ready pipeline after checking the classifier against the label table
    /// and the preprocessor output shape.
    pub fn new(
        labels: LabelTable,
        locator: Box<dyn FaceLocator>,
        preprocessor: RegionPreprocessor,
        classifier: Box<dyn EmotionClassifier>,
    ) -> Result<Self, PipelineError> {
        if classifier.num_classes() != labels.len() {
            return Err(PipelineError::LabelCountMismatch {
                classes: classifier.num_classes(),
                labels: labels.len(),
            });
        }
        if classifier.input_shape() != preprocessor.output_shape() {
            return Err(PipelineError::InputShapeMismatch {
                classifier: classifier.input_shape(),
                region: preprocessor.output_shape(),
            });
        }
        Ok(Self {
            labels,
            locator,
            preprocessor,
            classifier: ClassifierSlot::Ready(classifier),
        })
    }

    /// A pipeline whose classifier could not be loaded.
    ///
    /// Every `detect` call returns `model_unavailable` without touching the locator.
    pub fn unavailable(
        labels: LabelTable,
        locator: Box<dyn FaceLocator>,
        preprocessor: RegionPreprocessor,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            labels,
            locator,
            preprocessor,
            classifier: ClassifierSlot::Unavailable(reason.into()),
        }
    }

    /// Build the YuNet + ONNX classifier pipeline described by `settings`.
    ///
    /// A classifier that cannot be loaded leaves the pipeline in the unavailable state;
    /// a face detector that cannot be loaded, or a classifier that disagrees with the
    /// configured labels or input shape, is an error.
    pub fn load(settings: &AppSettings) -> Result<Self, PipelineError> {
        let _guard = timing_guard("emotion_core::pipeline_load", Level::Info);
        let locator = YuNetLocator::from_settings(settings)
            .map_err(|e| PipelineError::Locator(format!("{e:#}")))?;
        Self::with_locator(settings, Box::new(locator))
    }

    /// Build the labels, region stage, and ONNX classifier from `settings` around an
    /// already constructed `locator`.
    ///
    /// Classifier load failures map to the unavailable state exactly as in [`Pipeline::load`].
    pub fn with_locator(
        settings: &AppSettings,
        locator: Box<dyn FaceLocator>,
    ) -> Result<Self, PipelineError> {
        let labels = LabelTable::new(settings.classifier.labels.iter().map(String::as_str))?;
        let preprocessor = RegionPreprocessor::new(RegionConfig::from(settings))?;

        match OnnxEmotionClassifier::from_settings(settings) {
            Ok(classifier) => {
                let pipeline = Self::new(labels, locator, preprocessor, Box::new(classifier))?;
                info!(
                    "Emotion pipeline ready with {} labels",
                    pipeline.labels.len()
                );
                Ok(pipeline)
            }
            Err(e) => {
                error!("Emotion classifier unavailable: {e:#}");
                Ok(Self::unavailable(
                    labels,
                    locator,
                    preprocessor,
                    format!("{e:#}"),
                ))
            }
        }
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn preprocessor(&self) -> &RegionPreprocessor {
        &self.preprocessor
    }

    pub fn is_model_available(&self) -> bool {
        matches!(self.classifier, ClassifierSlot::Ready(_))
    }

    /// Why the classifier is missing, if it is.
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.classifier {
            ClassifierSlot::Ready(_) => None,
            ClassifierSlot::Unavailable(reason) => Some(reason),
        }
    }

    /// Classify the most prominent face in `frame`.
    pub fn detect(&self, frame: &Frame) -> DetectionResult {
        let _guard = timing_guard("emotion_core::detect", Level::Debug);
        match catch_unwind(AssertUnwindSafe(|| self.run_stages(frame))) {
            Ok(result) => result,
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                internal(format!("pipeline stage panicked: {detail}"))
            }
        }
    }

    /// Classify a raw `(height, width, 3)` BGR array.
    ///
    /// Arrays that do not form a valid frame yield `decode_error`.
    pub fn detect_bgr(&self, pixels: ArrayView3<'_, u8>) -> DetectionResult {
        match Frame::from_bgr_view(pixels) {
            Ok(frame) => self.detect(&frame),
            Err(e) => {
                warn!("Rejected frame: {e}");
                DetectionResult::not_detected(NotDetectedReason::DecodeError)
            }
        }
    }

    fn run_stages(&self, frame: &Frame) -> DetectionResult {
        let classifier = match &self.classifier {
            ClassifierSlot::Ready(classifier) => classifier,
            ClassifierSlot::Unavailable(_) => {
                return DetectionResult::not_detected(NotDetectedReason::ModelUnavailable);
            }
        };

        let located = match self.locator.locate(frame) {
            Ok(Some(located)) => located,
            Ok(None) => {
                debug!("No face found in {}x{} frame", frame.width(), frame.height());
                return DetectionResult::not_detected(NotDetectedReason::NoFaceFound);
            }
            Err(e) => return internal(format!("face locator failed: {e:#}")),
        };

        let prepared = match self.preprocessor.prepare(frame, &located.bbox) {
            Ok(prepared) => prepared,
            Err(e @ RegionError::FaceTooSmall { .. }) => {
                debug!("{e}");
                return DetectionResult::not_detected(NotDetectedReason::FaceTooSmall);
            }
            Err(e) => return internal(format!("region preprocessing failed: {e}")),
        };

        let probabilities = match classifier.predict(&prepared.tensor) {
            Ok(probabilities) => probabilities,
            Err(e) => return internal(format!("classifier failed: {e:#}")),
        };
        if let Err(detail) = check_distribution(&probabilities) {
            return internal(detail);
        }

        let scores = match EmotionScores::from_probabilities(&self.labels, &probabilities) {
            Ok(scores) => scores,
            Err(e) => return internal(e.to_string()),
        };
        let Some((label, confidence)) = scores.predominant().map(|(l, c)| (l.to_string(), c))
        else {
            return internal("classifier produced no scores".to_string());
        };

        debug!(
            "Detected {label} ({confidence:.3}) in face {:?}",
            prepared.face_box.to_array()
        );
        DetectionResult::Detected(EmotionDetection {
            label,
            confidence,
            scores,
            face_box: prepared.face_box,
            face_confidence: located.confidence,
        })
    }
}

fn check_distribution(probabilities: &[f32]) -> Result<(), String> {
    if let Some(bad) = probabilities
        .iter()
        .find(|p| !p.is_finite() || !(0.0..=1.0).contains(*p))
    {
        return Err(format!("classifier returned invalid probability {bad}"));
    }
    let total: f32 = probabilities.iter().sum();
    if (total - 1.0).abs() > SUM_TOLERANCE {
        return Err(format!("classifier probabilities sum to {total}"));
    }
    Ok(())
}

fn internal(detail: String) -> DetectionResult {
    warn!("Emotion detection failed: {detail}");
    DetectionResult::not_detected(NotDetectedReason::InternalError(detail))
}

/// Cloneable handle serializing access to one [`Pipeline`].
#[derive(Debug, Clone)]
pub struct SharedPipeline {
    inner: Arc<Mutex<Pipeline>>,
}

impl SharedPipeline {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            inner: Arc::new(Mutex::new(pipeline)),
        }
    }

    /// Run [`Pipeline::detect`] under the lock. A poisoned lock is reclaimed since the
    /// pipeline carries nothing from one call into the next.
    pub fn detect(&self, frame: &Frame) -> DetectionResult {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .detect(frame)
    }

    pub fn is_model_available(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_model_available()
    }
}

impl From<Pipeline> for SharedPipeline {
    fn from(pipeline: Pipeline) -> Self {
        Self::new(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        locator::LocatedFace, postprocess::BoundingBox, region::NormalizedFaceTensor,
    };
    use anyhow::Result;

    #[derive(Debug)]
    struct FixedLocator(Option<BoundingBox>);

    impl FaceLocator for FixedLocator {
        fn locate(&self, _frame: &Frame) -> Result<Option<LocatedFace>> {
            Ok(self.0.map(|bbox| LocatedFace {
                bbox,
                confidence: 0.9,
            }))
        }
    }

    #[derive(Debug)]
    struct FixedClassifier {
        shape: TensorShape,
        output: Vec<f32>,
    }

    impl EmotionClassifier for FixedClassifier {
        fn input_shape(&self) -> TensorShape {
            self.shape
        }

        fn num_classes(&self) -> usize {
            self.output.len()
        }

        fn predict(&self, _input: &NormalizedFaceTensor) -> Result<Vec<f32>> {
            Ok(self.output.clone())
        }
    }

    fn preprocessor() -> RegionPreprocessor {
        RegionPreprocessor::new(RegionConfig::default()).unwrap()
    }

    fn build(output: Vec<f32>) -> Pipeline {
        let preprocessor = preprocessor();
        let classifier = FixedClassifier {
            shape: preprocessor.output_shape(),
            output,
        };
        let labels = LabelTable::new(["a", "b", "c"]).unwrap();
        Pipeline::new(
            labels,
            Box::new(FixedLocator(Some(BoundingBox::new(0.0, 0.0, 64.0, 64.0)))),
            preprocessor,
            Box::new(classifier),
        )
        .unwrap()
    }

    fn frame() -> Frame {
        Frame::from_bgr_array(ndarray::Array3::from_elem((80, 80, 3), 128)).unwrap()
    }

    #[test]
    fn rejects_label_count_mismatch() {
        let preprocessor = preprocessor();
        let classifier = FixedClassifier {
            shape: preprocessor.output_shape(),
            output: vec![0.5, 0.5],
        };
        let err = Pipeline::new(
            LabelTable::fer2013(),
            Box::new(FixedLocator(None)),
            preprocessor,
            Box::new(classifier),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::LabelCountMismatch {
                classes: 2,
                labels: 7
            }
        ));
    }

    #[test]
    fn rejects_input_shape_mismatch() {
        let classifier = FixedClassifier {
            shape: TensorShape::new(64, 64, 1),
            output: vec![1.0 / 7.0; 7],
        };
        let err = Pipeline::new(
            LabelTable::fer2013(),
            Box::new(FixedLocator(None)),
            preprocessor(),
            Box::new(classifier),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InputShapeMismatch { .. }));
    }

    #[test]
    fn detects_with_fixed_stages() {
        let result = build(vec![0.2, 0.7, 0.1]).detect(&frame());
        let detection = result.detection().expect("detected");
        assert_eq!(detection.label, "b");
        assert_eq!(detection.confidence, 0.7);
        assert_eq!(detection.face_box.to_array(), [0, 0, 64, 64]);
        assert_eq!(detection.face_confidence, 0.9);
    }

    #[test]
    fn invalid_distribution_is_internal_error() {
        let result = build(vec![0.9, 0.9, 0.9]).detect(&frame());
        assert!(matches!(
            result.reason(),
            Some(NotDetectedReason::InternalError(_))
        ));

        let result = build(vec![f32::NAN, 0.5, 0.5]).detect(&frame());
        assert_eq!(result.reason().map(|r| r.code()), Some("internal_error"));
    }

    #[test]
    fn malformed_array_is_decode_error() {
        let pipeline = build(vec![0.2, 0.7, 0.1]);
        let pixels = ndarray::Array3::<u8>::zeros((10, 10, 4));
        assert_eq!(
            pipeline.detect_bgr(pixels.view()).reason(),
            Some(&NotDetectedReason::DecodeError)
        );
        let empty = ndarray::Array3::<u8>::zeros((0, 10, 3));
        assert_eq!(
            pipeline.detect_bgr(empty.view()).reason(),
            Some(&NotDetectedReason::DecodeError)
        );
    }

    #[test]
    fn loading_without_detector_is_fatal() {
        let mut settings = AppSettings::default();
        settings.detector_model_path = Some("missing/yunet.onnx".into());
        let err = Pipeline::load(&settings).unwrap_err();
        assert!(matches!(err, PipelineError::Locator(_)));
    }

    #[test]
    fn shared_pipeline_delegates() {
        let shared = SharedPipeline::from(build(vec![0.1, 0.1, 0.8]));
        let clone = shared.clone();
        assert!(clone.is_model_available());
        let result = std::thread::spawn(move || clone.detect(&frame()))
            .join()
            .unwrap();
        assert_eq!(result.detection().unwrap().label, "c");
        assert_eq!(shared.detect(&frame()), result);
    }
}
