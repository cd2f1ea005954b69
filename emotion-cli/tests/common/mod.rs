/// Common test utilities for CLI integration tests
use std::path::{Path, PathBuf};

use image::{Rgb, RgbImage};

pub const DETECTOR_MODEL: &str = "models/face_detection_yunet_2023mar.onnx";
pub const CLASSIFIER_MODEL: &str = "models/emotion_classifier.onnx";

/// Resolve a path relative to the workspace root.
pub fn workspace_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(relative)
}

/// The face detector model, or `None` (with a note on stderr) when it is not checked out.
pub fn find_detector_model() -> Option<PathBuf> {
    let path = workspace_path(DETECTOR_MODEL);
    if path.exists() {
        Some(path)
    } else {
        eprintln!("Skipping test: model not found at {}", path.display());
        None
    }
}

/// The emotion classifier model, if it is checked out.
pub fn find_classifier_model() -> Option<PathBuf> {
    let path = workspace_path(CLASSIFIER_MODEL);
    path.exists().then_some(path)
}

/// Write a flat gray PNG with no face in it.
pub fn write_blank_image(path: &Path, width: u32, height: u32) {
    RgbImage::from_pixel(width, height, Rgb([128, 128, 128]))
        .save(path)
        .expect("save blank image");
}
