//! Command-line argument definitions for emotion-cli.

use clap::{ArgAction, Parser};
use emotion_utils::config::{ChannelMode, ResizeQuality};
use std::path::PathBuf;

/// Detect the predominant facial emotion in images or base64-encoded frames.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct DetectArgs {
    /// Path to an image file or a directory containing images.
    #[arg(short, long, required_unless_present = "frame_base64_file")]
    pub input: Option<PathBuf>,

    /// File holding one base64-encoded frame (`-` reads stdin). A `data:image/...;base64,`
    /// prefix is accepted.
    #[arg(long = "frame-base64-file", value_name = "PATH", conflicts_with = "input")]
    pub frame_base64_file: Option<PathBuf>,

    /// Path to the YuNet face detector ONNX model (overrides the settings file).
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Path to the emotion classifier ONNX model (overrides the settings file).
    #[arg(short, long)]
    pub classifier: Option<PathBuf>,

    /// Optional settings JSON. Defaults to `config/settings.json` when present, otherwise built-in parameters.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable telemetry timing logs (defaults to settings file).
    #[arg(long, action = ArgAction::SetTrue)]
    pub telemetry: bool,

    /// Override telemetry logging level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub telemetry_level: Option<String>,

    /// Override face detector input width (pixels).
    #[arg(long)]
    pub width: Option<u32>,

    /// Override face detector input height (pixels).
    #[arg(long)]
    pub height: Option<u32>,

    /// Detector resize mode: `quality` (Triangle) or `speed` (fast Nearest).
    #[arg(long, value_name = "MODE")]
    pub resize_quality: Option<ResizeQuality>,

    /// Override face detector score threshold.
    #[arg(long)]
    pub score_threshold: Option<f32>,

    /// Override NMS threshold.
    #[arg(long)]
    pub nms_threshold: Option<f32>,

    /// Override top_k limit.
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Reject faces narrower or shorter than this many pixels.
    #[arg(long, value_name = "PIXELS")]
    pub min_face_size: Option<u32>,

    /// Classifier input channels: grayscale, rgb or bgr.
    #[arg(long, value_name = "MODE")]
    pub channels: Option<ChannelMode>,

    /// Write results to a JSON file instead of stdout.
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Directory to write annotated images with the classified face outlined.
    #[arg(long)]
    pub annotate: Option<PathBuf>,

    /// Number of worker threads (defaults to the number of logical CPUs).
    #[arg(short, long, value_name = "N")]
    pub jobs: Option<usize>,
}
