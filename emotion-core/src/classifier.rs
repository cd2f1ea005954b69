//! Emotion classifiers: a face tensor in, one probability per label out.

use std::{fmt::Debug, path::Path};

use anyhow::{Context, Result};
use emotion_utils::{
    config::{AppSettings, OutputActivation, TensorLayout},
    timing_guard,
};
use log::{Level, debug, info};
use tract_onnx::prelude::{Datum, InferenceFact, IntoTensor, Tensor, tvec};

use crate::{
    model::{RunnableModel, load_runnable},
    region::{NormalizedFaceTensor, TensorShape},
};

/// Probabilities outside `[0, 1]` by less than this are treated as rounding noise.
const PROBABILITY_TOLERANCE: f32 = 1e-4;

/// Maps a normalized face to a probability vector index-aligned with the label table.
///
/// Inference must be deterministic for a given input and set of weights.
pub trait EmotionClassifier: Send + Debug {
    /// Shape of the tensors `predict` accepts.
    fn input_shape(&self) -> TensorShape;

    /// Length of the vector `predict` returns.
    fn num_classes(&self) -> usize;

    /// Run inference. The result holds `num_classes()` finite probabilities summing to about 1.
    fn predict(&self, input: &NormalizedFaceTensor) -> Result<Vec<f32>>;
}

/// How an ONNX classifier is fed and how its output is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub input: TensorShape,
    pub layout: TensorLayout,
    pub output: OutputActivation,
}

impl From<&AppSettings> for ClassifierConfig {
    fn from(settings: &AppSettings) -> Self {
        let classifier = &settings.classifier;
        Self {
            input: TensorShape::new(
                classifier.input_height as usize,
                classifier.input_width as usize,
                classifier.channels.channels(),
            ),
            layout: classifier.layout,
            output: classifier.output,
        }
    }
}

/// [`EmotionClassifier`] running an ONNX graph through tract.
///
/// The input fact is pinned to the configured shape and the graph is probed with a
/// zero tensor at load time, so shape problems surface before the first frame.
#[derive(Debug)]
pub struct OnnxEmotionClassifier {
    runnable: RunnableModel,
    config: ClassifierConfig,
    num_classes: usize,
}

impl OnnxEmotionClassifier {
    pub fn load<P: AsRef<Path>>(model_path: P, config: ClassifierConfig) -> Result<Self> {
        let path = model_path.as_ref();
        let TensorShape {
            height,
            width,
            channels,
        } = config.input;
        anyhow::ensure!(
            height > 0 && width > 0 && channels > 0,
            "classifier input shape {} has a zero dimension",
            config.input
        );
        let graph_dims: [usize; 4] = match config.layout {
            TensorLayout::Nhwc => [1, height, width, channels],
            TensorLayout::Nchw => [1, channels, height, width],
        };

        let runnable = load_runnable(path, "emotion classifier", |model| {
            model
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(f32::datum_type(), graph_dims),
                )
                .map_err(|e| anyhow::anyhow!("unable to pin classifier input shape: {e}"))
        })?;

        let mut classifier = Self {
            runnable,
            config,
            num_classes: 0,
        };
        let probe = classifier
            .run_raw(&NormalizedFaceTensor::zeros(config.input))
            .context("classifier failed its startup probe")?;
        anyhow::ensure!(!probe.is_empty(), "classifier produced an empty output vector");
        classifier.num_classes = probe.len();

        info!(
            "Loaded emotion classifier {} (input {}, {:?}, {} classes)",
            path.display(),
            config.input,
            config.layout,
            classifier.num_classes
        );
        Ok(classifier)
    }

    /// Load the classifier described by `settings`.
    pub fn from_settings(settings: &AppSettings) -> Result<Self> {
        let path = settings
            .classifier_model_path
            .as_deref()
            .context("no emotion classifier model path configured")?;
        Self::load(path, settings.into())
    }

    fn run_raw(&self, input: &NormalizedFaceTensor) -> Result<Vec<f32>> {
        let shape = input.shape();
        anyhow::ensure!(
            shape == self.config.input,
            "face tensor shape {shape} does not match classifier input {}",
            self.config.input
        );

        let tensor = match self.config.layout {
            TensorLayout::Nhwc => Tensor::from_shape(&shape.dims(), &input.to_vec()),
            TensorLayout::Nchw => {
                let planar = input.as_array().view().permuted_axes([0, 3, 1, 2]);
                let data: Vec<f32> = planar.iter().copied().collect();
                Tensor::from_shape(&[1, shape.channels, shape.height, shape.width], &data)
            }
        }
        .map_err(|e| anyhow::anyhow!("failed to build classifier tensor: {e}"))?;

        let outputs = self
            .runnable
            .run(tvec![tensor.into()])
            .map_err(|e| anyhow::anyhow!("classifier execution failed: {e}"))?;
        let output = outputs
            .into_iter()
            .next()
            .context("classifier produced no outputs")?
            .into_tensor();

        let dims = output.shape();
        anyhow::ensure!(
            matches!(dims, [_] | [1, _]),
            "classifier output must be [N] or [1, N], got {dims:?}"
        );
        let values = output
            .as_slice::<f32>()
            .map_err(|e| anyhow::anyhow!("classifier output is not f32: {e}"))?;
        Ok(values.to_vec())
    }
}

impl EmotionClassifier for OnnxEmotionClassifier {
    fn input_shape(&self) -> TensorShape {
        self.config.input
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn predict(&self, input: &NormalizedFaceTensor) -> Result<Vec<f32>> {
        let _guard = timing_guard("emotion_core::classify", Level::Debug);
        let raw = self.run_raw(input)?;
        anyhow::ensure!(
            raw.len() == self.num_classes,
            "classifier returned {} values, expected {}",
            raw.len(),
            self.num_classes
        );
        let probabilities = match self.config.output {
            OutputActivation::Probabilities => validate_probabilities(&raw)?,
            OutputActivation::Logits => softmax(&raw)?,
        };
        debug!("classifier probabilities: {probabilities:?}");
        Ok(probabilities)
    }
}

/// Numerically stable softmax. Fails on empty or non-finite input.
pub fn softmax(logits: &[f32]) -> Result<Vec<f32>> {
    anyhow::ensure!(!logits.is_empty(), "cannot normalize an empty score vector");
    anyhow::ensure!(
        logits.iter().all(|v| v.is_finite()),
        "classifier produced non-finite logits"
    );
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    Ok(exps.into_iter().map(|v| v / sum).collect())
}

/// Check a vector that should already be a distribution.
///
/// Values must be finite and inside `[0, 1]` up to [`PROBABILITY_TOLERANCE`]; values
/// within tolerance are clamped.
pub fn validate_probabilities(values: &[f32]) -> Result<Vec<f32>> {
    anyhow::ensure!(!values.is_empty(), "classifier produced no probabilities");
    values
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            anyhow::ensure!(
                value.is_finite()
                    && (-PROBABILITY_TOLERANCE..=1.0 + PROBABILITY_TOLERANCE).contains(&value),
                "classifier output {index} is not a probability: {value}"
            );
            Ok(value.clamp(0.0, 1.0))
        })
        .collect()
}

/// Index and value of the largest element; the lowest index wins exact ties.
pub fn stable_argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &value) in values.iter().enumerate() {
        match best {
            Some((_, top)) if value <= top => {}
            _ if value.is_nan() => {}
            _ => best = Some((index, value)),
        }
    }
    best
}
