//! Face localization: frame in, at most one face region out.

use std::{fmt::Debug, path::Path};

use anyhow::Result;
use emotion_utils::{config::AppSettings, timing_guard};
use log::{Level, debug, trace};
use serde::Serialize;

use crate::{
    frame::Frame,
    model::YuNetModel,
    postprocess::{BoundingBox, PostprocessConfig, rank_candidates},
    preprocess::{PreprocessConfig, preprocess_frame},
};

/// The region a locator committed to and the detector's confidence in it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LocatedFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Finds the single face region a frame will be classified on.
///
/// Implementations return `Ok(None)` when no region clears their confidence threshold
/// and reserve `Err` for engine failures. They must not carry state from one call into
/// the next.
pub trait FaceLocator: Send + Debug {
    fn locate(&self, frame: &Frame) -> Result<Option<LocatedFace>>;
}

/// [`FaceLocator`] backed by the YuNet ONNX detector.
///
/// When YuNet proposes several faces the highest-ranked one after NMS wins.
#[derive(Debug)]
pub struct YuNetLocator {
    model: YuNetModel,
    preprocess: PreprocessConfig,
    postprocess: PostprocessConfig,
}

impl YuNetLocator {
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        preprocess: PreprocessConfig,
        postprocess: PostprocessConfig,
    ) -> Result<Self> {
        let model = YuNetModel::load(model_path, preprocess.input_size)?;
        Ok(Self {
            model,
            preprocess,
            postprocess,
        })
    }

    /// Build from the detector section of `settings`.
    pub fn from_settings(settings: &AppSettings) -> Result<Self> {
        let path = settings
            .detector_model_path
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no face detector model path configured"))?;
        Self::new(path, settings.input.into(), (&settings.detection).into())
    }
}

impl FaceLocator for YuNetLocator {
    fn locate(&self, frame: &Frame) -> Result<Option<LocatedFace>> {
        let _guard = timing_guard("emotion_core::locate", Level::Debug);
        let prep = preprocess_frame(frame, &self.preprocess)?;

        let raw = {
            let _guard = timing_guard("emotion_core::yunet_inference", Level::Debug);
            self.model.run(prep.tensor)?
        };
        let candidates = rank_candidates(&raw, prep.scale_x, prep.scale_y, &self.postprocess)?;
        if candidates.len() > 1 {
            debug!(
                "face locator found {} candidates; keeping the best ranked",
                candidates.len()
            );
        }

        let located = candidates.first().map(|candidate| LocatedFace {
            bbox: candidate.bbox,
            confidence: candidate.score,
        });
        trace!("face locator result: {located:?}");
        Ok(located)
    }
}
