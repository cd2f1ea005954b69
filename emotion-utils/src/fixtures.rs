use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::{
    env, fs,
    path::{Path, PathBuf},
};

const FIXTURE_ENV: &str = "EMOTION_FIXTURE_ROOT";

/// Resolve the root directory that stores project fixtures.
///
/// `$EMOTION_FIXTURE_ROOT` wins; otherwise the first `fixtures` directory found while
/// walking up from this crate's manifest directory is used.
pub fn fixtures_dir() -> Result<PathBuf> {
    if let Ok(value) = env::var(FIXTURE_ENV) {
        return Ok(PathBuf::from(value));
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .ancestors()
        .map(|ancestor| ancestor.join("fixtures"))
        .find(|candidate| candidate.is_dir())
        .with_context(|| {
            format!(
                "fixtures directory not found starting from {}",
                manifest_dir.display()
            )
        })
}

/// Resolve a path inside the fixture folder, failing if it does not exist.
pub fn fixture_path<P: AsRef<Path>>(relative: P) -> Result<PathBuf> {
    let relative = relative.as_ref();
    let root = fixtures_dir()?;
    let full = root.join(relative);
    anyhow::ensure!(
        full.exists(),
        "fixture {} does not exist under {}",
        relative.display(),
        root.display()
    );
    Ok(full)
}

/// Load fixture JSON into a strongly-typed structure.
pub fn load_fixture_json<P, T>(relative: P) -> Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let path = fixture_path(relative)?;
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("failed to read JSON fixture {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse JSON fixture {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppSettings, ChannelMode, OutputActivation, TensorLayout};

    #[test]
    fn fixture_path_resolves_settings() {
        let path = fixture_path("settings/grayscale_48.json").expect("settings fixture");
        assert!(path.ends_with(Path::new("settings/grayscale_48.json")));
    }

    #[test]
    fn fixture_path_missing_file_errors() {
        assert!(fixture_path("settings/missing.json").is_err());
    }

    #[test]
    fn settings_fixtures_deserialize() {
        let gray: AppSettings = load_fixture_json("settings/grayscale_48.json").expect("gray");
        assert_eq!(gray.classifier.channels, ChannelMode::Grayscale);
        assert_eq!(gray.input.width, 320);
        assert_eq!(gray.detection.top_k, 50);

        let rgb: AppSettings = load_fixture_json("settings/rgb_logits_nchw.json").expect("rgb");
        assert_eq!(rgb.classifier.layout, TensorLayout::Nchw);
        assert_eq!(rgb.classifier.output, OutputActivation::Logits);
        assert_eq!(rgb.classifier.labels.len(), 8);
        assert_eq!(rgb.region.min_face_size, 64);
    }
}
