//! Input collection.

use std::path::{Path, PathBuf};

use anyhow::Result;
use emotion_utils::normalize_path;
use log::debug;
use walkdir::WalkDir;

use crate::args::DetectArgs;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// One frame to run through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputTarget {
    /// An encoded image file on disk.
    ImageFile(PathBuf),
    /// A file (or stdin, for `-`) holding one base64 frame.
    Base64Frame(PathBuf),
}

impl InputTarget {
    /// Name echoed in the output record.
    pub fn display_name(&self) -> String {
        match self {
            InputTarget::ImageFile(path) => path.display().to_string(),
            InputTarget::Base64Frame(path) if is_stdin(path) => "base64:stdin".to_string(),
            InputTarget::Base64Frame(path) => format!("base64:{}", path.display()),
        }
    }

    /// File name used when saving an annotated copy.
    pub fn annotation_file_name(&self) -> PathBuf {
        match self {
            InputTarget::ImageFile(path) => path
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("frame.png")),
            InputTarget::Base64Frame(path) => {
                let stem = path
                    .file_stem()
                    .filter(|_| !is_stdin(path))
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_else(|| "frame".to_string());
                PathBuf::from(format!("{stem}.png"))
            }
        }
    }
}

pub(crate) fn is_stdin(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// Resolve the command line into the list of frames to process.
pub fn collect_targets(args: &DetectArgs) -> Result<Vec<InputTarget>> {
    if let Some(path) = args.frame_base64_file.as_ref() {
        let path = if is_stdin(path) {
            path.clone()
        } else {
            normalize_path(path)?
        };
        return Ok(vec![InputTarget::Base64Frame(path)]);
    }

    let Some(input) = args.input.as_ref() else {
        anyhow::bail!("either --input or --frame-base64-file is required");
    };
    let input_path = normalize_path(input)?;
    let images = collect_images(&input_path)?;
    if images.is_empty() {
        anyhow::bail!(
            "no images found at {} (supported extensions: {})",
            input_path.display(),
            IMAGE_EXTENSIONS.join(", ")
        );
    }
    Ok(images.into_iter().map(InputTarget::ImageFile).collect())
}

/// Collect all image paths from a file or directory.
pub fn collect_images(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if !path.is_dir() {
        anyhow::bail!(
            "input path is neither file nor directory: {}",
            path.display()
        );
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
            let ext_lower = ext.to_ascii_lowercase();
            if IMAGE_EXTENSIONS.contains(&ext_lower.as_str()) {
                images.push(entry.path().to_path_buf());
            } else {
                debug!("Skipping non-image file {}", entry.path().display());
            }
        }
    }
    images.sort();
    Ok(images)
}
