//! Per-frame outcomes returned by the pipeline.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::{region::FaceBox, scores::EmotionScores};

/// A classified face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionDetection {
    /// Label with the highest probability.
    pub label: String,
    /// Probability of `label`, in `[0, 1]`.
    pub confidence: f32,
    pub scores: EmotionScores,
    /// The clamped region that was classified.
    pub face_box: FaceBox,
    /// Locator confidence for `face_box`.
    pub face_confidence: f32,
}

/// Why a frame produced no emotion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotDetectedReason {
    NoFaceFound,
    FaceTooSmall,
    ModelUnavailable,
    DecodeError,
    /// Unexpected failure inside a stage; carries a diagnostic for logs.
    InternalError(String),
}

impl NotDetectedReason {
    /// Stable snake_case identifier used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoFaceFound => "no_face_found",
            Self::FaceTooSmall => "face_too_small",
            Self::ModelUnavailable => "model_unavailable",
            Self::DecodeError => "decode_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Diagnostic text carried by `InternalError`.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::InternalError(detail) => Some(detail),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NoFaceFound => "No face found in the image".to_string(),
            Self::FaceTooSmall => "Detected face is too small to classify".to_string(),
            Self::ModelUnavailable => "Emotion model is not available".to_string(),
            Self::DecodeError => "Image could not be decoded".to_string(),
            Self::InternalError(detail) => format!("Internal error: {detail}"),
        }
    }
}

impl fmt::Display for NotDetectedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl Serialize for NotDetectedReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// Exactly one of a classification or a reason for its absence.
///
/// Serialized with a `status` tag; `internal_error` also carries its `detail`.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionResult {
    Detected(EmotionDetection),
    NotDetected { reason: NotDetectedReason },
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum TaggedResult<'a> {
    Detected(&'a EmotionDetection),
    NotDetected {
        reason: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<&'a str>,
    },
}

impl Serialize for DetectionResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tagged = match self {
            Self::Detected(detection) => TaggedResult::Detected(detection),
            Self::NotDetected { reason } => TaggedResult::NotDetected {
                reason: reason.code(),
                detail: reason.detail(),
            },
        };
        tagged.serialize(serializer)
    }
}

impl DetectionResult {
    pub fn not_detected(reason: NotDetectedReason) -> Self {
        Self::NotDetected { reason }
    }

    pub fn is_detected(&self) -> bool {
        matches!(self, Self::Detected(_))
    }

    pub fn detection(&self) -> Option<&EmotionDetection> {
        match self {
            Self::Detected(detection) => Some(detection),
            Self::NotDetected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<&NotDetectedReason> {
        match self {
            Self::Detected(_) => None,
            Self::NotDetected { reason } => Some(reason),
        }
    }
}
