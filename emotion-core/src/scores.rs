use serde::{Serialize, Serializer, ser::SerializeMap};
use thiserror::Error;

use crate::{classifier::stable_argmax, labels::LabelTable};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("classifier produced {actual} scores for {expected} labels")]
pub struct ScoreCountMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Per-label probabilities in label table order.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionScores {
    entries: Vec<(String, f32)>,
}

impl EmotionScores {
    /// Pair each probability with the label at the same index.
    pub fn from_probabilities(
        labels: &LabelTable,
        probabilities: &[f32],
    ) -> Result<Self, ScoreCountMismatch> {
        if probabilities.len() != labels.len() {
            return Err(ScoreCountMismatch {
                expected: labels.len(),
                actual: probabilities.len(),
            });
        }
        let entries = labels
            .iter()
            .zip(probabilities)
            .map(|(label, &p)| (label.to_string(), p))
            .collect();
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, label: &str) -> Option<f32> {
        self.entries
            .iter()
            .find_map(|(name, p)| (name == label).then_some(*p))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&str, f32)> {
        self.entries.iter().map(|(name, p)| (name.as_str(), *p))
    }

    /// Label with the highest probability; earlier labels win exact ties.
    pub fn predominant(&self) -> Option<(&str, f32)> {
        let values: Vec<f32> = self.entries.iter().map(|(_, p)| *p).collect();
        stable_argmax(&values).map(|(index, p)| (self.entries[index].0.as_str(), p))
    }

    pub fn total(&self) -> f32 {
        self.entries.iter().map(|(_, p)| p).sum()
    }
}

impl Serialize for EmotionScores {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (label, p) in &self.entries {
            map.serialize_entry(label, p)?;
        }
        map.end()
    }
}
