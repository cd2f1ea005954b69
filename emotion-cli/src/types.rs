//! Output records written by emotion-cli.

use emotion_core::{DetectionResult, EmotionScores};
use serde::Serialize;

/// The result for one input, flattened for JSON consumers.
#[derive(Debug, Serialize)]
pub struct EmotionRecord {
    pub image: String,
    pub detected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    /// Rounded to four decimals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_emotions: Option<EmotionScores>,
    /// `[x, y, width, height]` in frame pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face_box: Option<[u32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotated: Option<String>,
}

impl EmotionRecord {
    pub fn from_result(image: String, result: &DetectionResult) -> Self {
        match result {
            DetectionResult::Detected(detection) => Self {
                image,
                detected: true,
                emotion: Some(detection.label.clone()),
                confidence: Some(round4(detection.confidence)),
                all_emotions: Some(detection.scores.clone()),
                face_box: Some(detection.face_box.to_array()),
                reason: None,
                message: None,
                annotated: None,
            },
            DetectionResult::NotDetected { reason } => Self {
                image,
                detected: false,
                emotion: None,
                confidence: None,
                all_emotions: None,
                face_box: None,
                reason: Some(reason.code()),
                message: Some(reason.message()),
                annotated: None,
            },
        }
    }

    /// One-line summary for progress logs.
    pub fn summary(&self) -> String {
        match (&self.emotion, self.confidence, self.reason) {
            (Some(emotion), Some(confidence), _) => format!("{emotion} ({confidence})"),
            (_, _, Some(reason)) => reason.to_string(),
            _ => "no result".to_string(),
        }
    }
}

fn round4(value: f32) -> f64 {
    (f64::from(value) * 10_000.0).round() / 10_000.0
}
