//! Correspondence between classifier output indices and emotion names.

use std::{collections::HashSet, sync::Arc};

use emotion_utils::config::DEFAULT_LABELS;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelTableError {
    #[error("label table must contain at least one label")]
    Empty,
    #[error("label at index {index} is blank")]
    Blank { index: usize },
    #[error("label '{label}' appears more than once")]
    Duplicate { label: String },
}

/// Ordered, unique emotion labels.
///
/// Index `i` names output `i` of the classifier. The order is a contract with the
/// model artifact and cannot be checked at runtime beyond the label count. Cloning is
/// cheap and the table is immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Arc<[String]>,
}

impl LabelTable {
    pub fn new<I, S>(labels: I) -> Result<Self, LabelTableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels
            .into_iter()
            .map(|label| label.into().trim().to_string())
            .collect();
        if labels.is_empty() {
            return Err(LabelTableError::Empty);
        }

        let mut seen = HashSet::with_capacity(labels.len());
        for (index, label) in labels.iter().enumerate() {
            if label.is_empty() {
                return Err(LabelTableError::Blank { index });
            }
            if !seen.insert(label.as_str()) {
                return Err(LabelTableError::Duplicate {
                    label: label.clone(),
                });
            }
        }

        Ok(Self {
            labels: labels.into(),
        })
    }

    /// The seven FER-2013 categories: angry, disgust, fear, happy, sad, surprise, neutral.
    pub fn fer2013() -> Self {
        Self {
            labels: DEFAULT_LABELS.iter().map(|label| label.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Always `false` for a constructed table.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|candidate| candidate == label)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::fer2013()
    }
}
