//! Shared configuration types consumed across the emotion workspace.
//!
//! These structures describe the face locator, the region normalizer, and the emotion
//! classifier so a single JSON document can drive both the library and the CLI front end.

use anyhow::{Context, Result};
use log::{LevelFilter, warn};
use serde::{Deserialize, Serialize};
use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Environment variable that overrides [`default_settings_path`].
pub const SETTINGS_PATH_ENV: &str = "EMOTION_SETTINGS_PATH";

/// Labels in the order the FER-2013 style classifiers were trained on.
pub const DEFAULT_LABELS: [&str; 7] = [
    "angry", "disgust", "fear", "happy", "sad", "surprise", "neutral",
];

/// Face locator post-processing parameters.
///
/// These settings control score filtering and non-maximum suppression (NMS) of the raw
/// YuNet candidates before the pipeline commits to the first survivor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum confidence for a candidate face region.
    pub score_threshold: f32,
    /// Threshold for non-maximum suppression to merge overlapping bounding boxes.
    pub nms_threshold: f32,
    /// The maximum number of candidates kept after sorting by score.
    pub top_k: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
            top_k: 5_000,
        }
    }
}

/// Resampling strategy used whenever an image is scaled to a fixed size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResizeQuality {
    /// Bilinear (Triangle filter).
    #[default]
    Quality,
    /// Nearest neighbour, favouring throughput.
    Speed,
}

impl fmt::Display for ResizeQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResizeQuality::Quality => "quality",
            ResizeQuality::Speed => "speed",
        })
    }
}

impl FromStr for ResizeQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quality" | "bilinear" => Ok(ResizeQuality::Quality),
            "speed" | "nearest" => Ok(ResizeQuality::Speed),
            other => Err(format!(
                "invalid resize quality '{other}'; expected 'quality' or 'speed'"
            )),
        }
    }
}

/// Face locator input resolution in pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputDimensions {
    pub width: u32,
    pub height: u32,
    /// Resampling used when scaling frames to the locator input.
    pub resize_quality: ResizeQuality,
}

impl Default for InputDimensions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 640,
            resize_quality: ResizeQuality::Speed,
        }
    }
}

/// Channel depth the classifier was trained on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChannelMode {
    /// Single luma channel (ITU-R BT.601 weights).
    #[default]
    Grayscale,
    /// Three channels in R, G, B order.
    Rgb,
    /// Three channels in B, G, R order.
    Bgr,
}

impl ChannelMode {
    /// Number of channels in the tensor produced for this mode.
    pub fn channels(self) -> usize {
        match self {
            ChannelMode::Grayscale => 1,
            ChannelMode::Rgb | ChannelMode::Bgr => 3,
        }
    }
}

impl FromStr for ChannelMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grayscale" | "gray" | "grey" | "luma" => Ok(ChannelMode::Grayscale),
            "rgb" => Ok(ChannelMode::Rgb),
            "bgr" => Ok(ChannelMode::Bgr),
            other => Err(format!(
                "invalid channel mode '{other}'; expected 'grayscale', 'rgb' or 'bgr'"
            )),
        }
    }
}

/// Memory layout of the classifier graph input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TensorLayout {
    /// `[1, H, W, C]` (Keras exports).
    #[default]
    Nhwc,
    /// `[1, C, H, W]` (PyTorch exports).
    Nchw,
}

/// Interpretation of the classifier's raw output vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputActivation {
    /// The graph ends in a softmax.
    #[default]
    Probabilities,
    /// Unnormalized scores; softmax is applied after inference.
    Logits,
}

/// Minimum-size gate and resampling for the face crop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegionSettings {
    /// Faces narrower or shorter than this (after clamping) are rejected.
    pub min_face_size: u32,
    pub resize_quality: ResizeQuality,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            min_face_size: 48,
            resize_quality: ResizeQuality::Quality,
        }
    }
}

/// Description of the emotion classifier artifact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierSettings {
    /// Spatial width of the trained input.
    pub input_width: u32,
    /// Spatial height of the trained input.
    pub input_height: u32,
    pub channels: ChannelMode,
    pub layout: TensorLayout,
    pub output: OutputActivation,
    /// Output index order of the classifier.
    pub labels: Vec<String>,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            input_width: 48,
            input_height: 48,
            channels: ChannelMode::Grayscale,
            layout: TensorLayout::Nhwc,
            output: OutputActivation::Probabilities,
            labels: DEFAULT_LABELS.iter().map(|label| label.to_string()).collect(),
        }
    }
}

/// Settings controlling optional runtime telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether telemetry timing logs are enabled.
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }
}

/// Persistent settings for the detection pipeline.
///
/// Model paths are only read at startup; changing them requires building a new pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// YuNet ONNX face detector.
    pub detector_model_path: Option<String>,
    /// Emotion classifier ONNX graph.
    pub classifier_model_path: Option<String>,
    /// Face locator input resolution.
    pub input: InputDimensions,
    pub detection: DetectionSettings,
    pub region: RegionSettings,
    pub classifier: ClassifierSettings,
    pub telemetry: TelemetrySettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            detector_model_path: Some("models/face_detection_yunet_2023mar.onnx".into()),
            classifier_model_path: Some("models/emotion_classifier.onnx".into()),
            input: InputDimensions::default(),
            detection: DetectionSettings::default(),
            region: RegionSettings::default(),
            classifier: ClassifierSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl AppSettings {
    /// Load settings from a JSON file.
    ///
    /// Missing model paths fall back to the defaults and out-of-range values are sanitized.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;

        let defaults = AppSettings::default();
        if settings.detector_model_path.is_none() {
            settings.detector_model_path = defaults.detector_model_path;
        }
        if settings.classifier_model_path.is_none() {
            settings.classifier_model_path = defaults.classifier_model_path;
        }
        settings.sanitize();

        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// Clamp thresholds into range and restore an empty label list.
    pub fn sanitize(&mut self) {
        let detection = &mut self.detection;
        if !detection.score_threshold.is_finite() {
            detection.score_threshold = DetectionSettings::default().score_threshold;
        }
        detection.score_threshold = detection.score_threshold.clamp(0.0, 1.0);
        if !detection.nms_threshold.is_finite() {
            detection.nms_threshold = DetectionSettings::default().nms_threshold;
        }
        detection.nms_threshold = detection.nms_threshold.clamp(0.0, 1.0);

        if self.classifier.labels.is_empty() {
            warn!("settings contain no classifier labels; using the default emotion set");
            self.classifier.labels = ClassifierSettings::default().labels;
        }
    }
}

/// Returns the default settings location (`config/settings.json`, or `$EMOTION_SETTINGS_PATH`).
pub fn default_settings_path() -> PathBuf {
    if let Ok(value) = env::var(SETTINGS_PATH_ENV)
        && !value.trim().is_empty()
    {
        return PathBuf::from(value);
    }
    env::current_dir()
        .map(|dir| dir.join("config/settings.json"))
        .unwrap_or_else(|_| PathBuf::from("config/settings.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_round_trip() {
        let file = NamedTempFile::new().expect("tempfile");
        let settings = AppSettings::default();
        settings.save_to_path(file.path()).expect("save");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.input, settings.input);
        assert_eq!(loaded.detection, settings.detection);
        assert_eq!(loaded.region, settings.region);
        assert_eq!(loaded.classifier, settings.classifier);
        assert_eq!(loaded.detector_model_path, settings.detector_model_path);
        assert_eq!(loaded.classifier_model_path, settings.classifier_model_path);
        assert_eq!(loaded.telemetry.level, settings.telemetry.level);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let file = NamedTempFile::new().expect("tempfile");
        let json = r#"{
            "detection": { "score_threshold": 0.65 },
            "classifier": { "input_width": 64, "input_height": 64, "channels": "rgb", "layout": "nchw", "output": "logits" }
        }"#;
        fs::write(file.path(), json).expect("write custom settings");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.detection.score_threshold, 0.65);
        assert_eq!(loaded.detection.top_k, 5_000);
        assert_eq!(loaded.classifier.input_width, 64);
        assert_eq!(loaded.classifier.channels, ChannelMode::Rgb);
        assert_eq!(loaded.classifier.layout, TensorLayout::Nchw);
        assert_eq!(loaded.classifier.output, OutputActivation::Logits);
        assert_eq!(loaded.classifier.labels.len(), DEFAULT_LABELS.len());
        assert_eq!(loaded.region.min_face_size, 48);
        assert!(loaded.detector_model_path.is_some());
        assert!(loaded.classifier_model_path.is_some());
    }

    #[test]
    fn sanitize_clamps_thresholds_and_restores_labels() {
        let mut settings = AppSettings::default();
        settings.detection.score_threshold = 1.7;
        settings.detection.nms_threshold = f32::NAN;
        settings.classifier.labels.clear();

        settings.sanitize();

        assert_eq!(settings.detection.score_threshold, 1.0);
        assert_eq!(settings.detection.nms_threshold, 0.3);
        assert_eq!(settings.classifier.labels[0], "angry");
        assert_eq!(settings.classifier.labels[6], "neutral");
    }

    #[test]
    fn channel_mode_parses_aliases() {
        assert_eq!("Gray".parse::<ChannelMode>(), Ok(ChannelMode::Grayscale));
        assert_eq!("BGR".parse::<ChannelMode>(), Ok(ChannelMode::Bgr));
        assert!("cmyk".parse::<ChannelMode>().is_err());
        assert_eq!(ChannelMode::Rgb.channels(), 3);
        assert_eq!(ChannelMode::Grayscale.channels(), 1);
    }

    #[test]
    fn telemetry_level_parses_variants() {
        let telemetry = TelemetrySettings {
            level: "TRACE".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Trace);

        let telemetry = TelemetrySettings {
            level: "bogus".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Debug);
    }
}
