use std::cmp::Ordering;

use anyhow::Result;
use emotion_utils::config::DetectionSettings;
use serde::Serialize;
use tract_onnx::prelude::{Tensor, tract_ndarray::ArrayView2};

/// Columns per decoded YuNet row: bbox (4), five landmarks (10), score (1).
pub(crate) const YUNET_COLUMNS: usize = 15;
const SCORE_COLUMN: usize = 14;

/// Candidate filtering applied to raw face detector rows.
#[derive(Debug, Clone, PartialEq)]
pub struct PostprocessConfig {
    /// Candidates scoring below this are never reported.
    pub score_threshold: f32,
    /// IoU above which a lower-ranked candidate is suppressed.
    pub nms_threshold: f32,
    /// Maximum candidates kept after ranking (0 keeps all).
    pub top_k: usize,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        DetectionSettings::default().into()
    }
}

impl From<DetectionSettings> for PostprocessConfig {
    fn from(settings: DetectionSettings) -> Self {
        Self {
            score_threshold: settings.score_threshold,
            nms_threshold: settings.nms_threshold,
            top_k: settings.top_k,
        }
    }
}

impl From<&DetectionSettings> for PostprocessConfig {
    fn from(settings: &DetectionSettings) -> Self {
        settings.clone().into()
    }
}

/// Fractional axis-aligned box in source image pixels.
///
/// Detector boxes may extend past the image edges; see
/// [`FaceBox::clamp_from`](crate::region::FaceBox::clamp_from) for the pixel-exact form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection over union with `other`.
    pub fn iou(&self, other: &Self) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if intersection <= 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - intersection;
        if union <= 0.0 { 0.0 } else { intersection / union }
    }
}

/// A face candidate that survived filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub score: f32,
}

/// Turn decoded YuNet rows into ranked face candidates.
///
/// Rows are score-filtered, rescaled into source coordinates, sorted best-first,
/// truncated to `top_k` and de-duplicated with NMS. The returned order is the
/// detector's ranking; index 0 is the candidate the pipeline commits to.
pub fn rank_candidates(
    output: &Tensor,
    scale_x: f32,
    scale_y: f32,
    config: &PostprocessConfig,
) -> Result<Vec<Candidate>> {
    let rows = detection_rows(output)?;

    let mut candidates: Vec<Candidate> = rows
        .rows()
        .into_iter()
        .filter_map(|row| {
            let score = row[SCORE_COLUMN];
            if !score.is_finite() || score < config.score_threshold {
                return None;
            }
            let bbox = BoundingBox::new(
                row[0] * scale_x,
                row[1] * scale_y,
                row[2] * scale_x,
                row[3] * scale_y,
            );
            let usable = [bbox.x, bbox.y, bbox.width, bbox.height]
                .iter()
                .all(|value| value.is_finite())
                && bbox.width > 0.0
                && bbox.height > 0.0;
            usable.then_some(Candidate { bbox, score })
        })
        .collect();

    // Stable sort keeps the detector's own order among equal scores.
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));

    if config.top_k > 0 {
        candidates.truncate(config.top_k);
    }
    if config.nms_threshold > 0.0 && candidates.len() > 1 {
        candidates = non_max_suppression(candidates, config.nms_threshold);
    }

    Ok(candidates)
}

fn detection_rows(output: &Tensor) -> Result<ArrayView2<'_, f32>> {
    let rows = match output.shape() {
        [rows, YUNET_COLUMNS] | [1, rows, YUNET_COLUMNS] => *rows,
        other => anyhow::bail!(
            "face detector output must be [N, {YUNET_COLUMNS}] or [1, N, {YUNET_COLUMNS}] (got {other:?})"
        ),
    };

    let slice = output
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("face detector output is not f32: {e}"))?;

    ArrayView2::from_shape((rows, YUNET_COLUMNS), slice)
        .map_err(|_| anyhow::anyhow!("face detector output data is not contiguous"))
}

fn non_max_suppression(candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept
            .iter()
            .all(|survivor| candidate.bbox.iou(&survivor.bbox) <= threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(x: f32, y: f32, w: f32, h: f32, score: f32) -> [f32; YUNET_COLUMNS] {
        let mut row = [0.0; YUNET_COLUMNS];
        row[..4].copy_from_slice(&[x, y, w, h]);
        row[SCORE_COLUMN] = score;
        row
    }

    fn tensor_from_rows(rows: &[[f32; YUNET_COLUMNS]]) -> Tensor {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_shape(&[rows.len(), YUNET_COLUMNS], &flat).unwrap()
    }

    fn config(score_threshold: f32) -> PostprocessConfig {
        PostprocessConfig {
            score_threshold,
            nms_threshold: 0.3,
            top_k: 10,
        }
    }

    #[test]
    fn filters_by_score_and_scales_coordinates() {
        let tensor = tensor_from_rows(&[
            row(10.0, 20.0, 30.0, 40.0, 0.95),
            row(5.0, 5.0, 10.0, 10.0, 0.2),
        ]);

        let candidates = rank_candidates(&tensor, 2.0, 0.5, &config(0.6)).expect("rank");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].score, 0.95);
        assert_eq!(candidates[0].bbox, BoundingBox::new(20.0, 10.0, 60.0, 20.0));
    }

    #[test]
    fn ranks_best_first_and_suppresses_overlaps() {
        let tensor = tensor_from_rows(&[
            row(100.0, 100.0, 50.0, 50.0, 0.7),
            row(0.0, 0.0, 10.0, 10.0, 0.9),
            row(1.0, 1.0, 10.0, 10.0, 0.95),
        ]);

        let candidates = rank_candidates(&tensor, 1.0, 1.0, &config(0.6)).expect("rank");

        let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
        assert_eq!(scores, [0.95, 0.7]);
    }

    #[test]
    fn drops_degenerate_and_non_finite_rows() {
        let tensor = tensor_from_rows(&[
            row(0.0, 0.0, 0.0, 10.0, 0.9),
            row(f32::NAN, 0.0, 10.0, 10.0, 0.9),
            row(0.0, 0.0, 10.0, 10.0, f32::NAN),
        ]);

        let candidates = rank_candidates(&tensor, 1.0, 1.0, &config(0.5)).expect("rank");
        assert!(candidates.is_empty());
    }

    #[test]
    fn accepts_batched_shape_and_rejects_unknown_shapes() {
        let batched = Tensor::from_shape(&[1, 1, YUNET_COLUMNS], &row(0.0, 0.0, 4.0, 4.0, 0.9))
            .unwrap();
        assert_eq!(
            rank_candidates(&batched, 1.0, 1.0, &config(0.6))
                .unwrap()
                .len(),
            1
        );

        let wrong = Tensor::from_shape(&[2, 3], &[0.0f32; 6]).unwrap();
        assert!(rank_candidates(&wrong, 1.0, 1.0, &config(0.6)).is_err());
    }

    #[test]
    fn converts_detection_settings_into_config() {
        let settings = DetectionSettings {
            score_threshold: 0.55,
            nms_threshold: 0.25,
            top_k: 12,
        };
        let config: PostprocessConfig = (&settings).into();
        assert_eq!(config.score_threshold, 0.55);
        assert_eq!(config.nms_threshold, 0.25);
        assert_eq!(config.top_k, 12);
    }
}
