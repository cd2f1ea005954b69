use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};
use tract_onnx::prelude::{
    Framework, Graph, InferenceModel, InferenceModelExt, IntoTensor, SimplePlan, Tensor, TypedFact,
    TypedOp, tvec,
};

use crate::postprocess::YUNET_COLUMNS;
use crate::preprocess::InputSize;

pub(crate) type RunnableModel =
    SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const STRIDES: [usize; 3] = [8, 16, 32];
/// cls, obj, bbox, kps for every stride.
const HEADS: usize = 4;

/// Load an ONNX graph, preferring the optimized plan and falling back to the
/// decluttered one when tract cannot optimize it.
///
/// `prepare` is applied to the inference model first, e.g. to pin input facts.
pub(crate) fn load_runnable<F>(path: &Path, what: &str, prepare: F) -> Result<RunnableModel>
where
    F: Fn(InferenceModel) -> Result<InferenceModel>,
{
    anyhow::ensure!(path.exists(), "{what} model not found: {}", path.display());

    let parse = || -> Result<InferenceModel> {
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to parse ONNX graph from {}", path.display()))?;
        prepare(model)
    };

    let optimized = parse().and_then(|model| {
        model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("unable to optimize {what} graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make {what} graph runnable: {e}"))
    });

    match optimized {
        Ok(plan) => {
            debug!("{what} model {} optimized", path.display());
            Ok(plan)
        }
        Err(opt_err) => {
            warn!(
                "{what} model {} failed optimized load ({opt_err:#}); using the decluttered graph",
                path.display()
            );
            parse()?
                .into_typed()
                .map_err(|e| anyhow::anyhow!("unable to type-check {what} graph: {e}"))?
                .into_decluttered()
                .map_err(|e| anyhow::anyhow!("unable to declutter {what} graph: {e}"))?
                .into_runnable()
                .map_err(|e| anyhow::anyhow!("unable to make {what} graph runnable: {e}"))
                .with_context(|| format!("decluttered fallback failed after: {opt_err}"))
        }
    }
}

/// The YuNet face detector graph.
#[derive(Debug)]
pub struct YuNetModel {
    runnable: RunnableModel,
    input_size: InputSize,
}

impl YuNetModel {
    /// Load the YuNet graph that will be fed `input_size` tensors.
    pub fn load<P: AsRef<Path>>(model_path: P, input_size: InputSize) -> Result<Self> {
        let runnable = load_runnable(model_path.as_ref(), "YuNet", Ok)?;
        Ok(Self {
            runnable,
            input_size,
        })
    }

    /// Run YuNet on a `[1, 3, H, W]` BGR tensor.
    ///
    /// Returns `[N, 15]` rows of `[x, y, w, h, 5 x (lx, ly), score]` in input space,
    /// decoding the per-stride heads when the graph exports them separately.
    pub fn run(&self, input: Tensor) -> Result<Tensor> {
        let outputs = self
            .runnable
            .run(tvec![input.into()])
            .map_err(|e| anyhow::anyhow!("YuNet execution failed: {e}"))?;

        let mut tensors: Vec<Tensor> = outputs.into_iter().map(|v| v.into_tensor()).collect();
        match tensors.len() {
            1 => tensors
                .pop()
                .context("YuNet model produced no outputs"),
            len if len == STRIDES.len() * HEADS => decode_heads(&tensors, self.input_size),
            other => anyhow::bail!(
                "unexpected number of YuNet outputs: expected 1 or {}, got {other}",
                STRIDES.len() * HEADS
            ),
        }
    }

    pub fn input_size(&self) -> InputSize {
        self.input_size
    }
}

/// Borrowed output heads of one stride level.
struct StrideHeads<'a> {
    stride: usize,
    cols: usize,
    rows: usize,
    cls: &'a [f32],
    obj: &'a [f32],
    bbox: &'a [f32],
    kps: &'a [f32],
}

impl<'a> StrideHeads<'a> {
    fn gather(outputs: &'a [Tensor], level: usize, pad: (usize, usize)) -> Result<Self> {
        let stride = STRIDES[level];
        let (pad_w, pad_h) = pad;
        anyhow::ensure!(
            pad_w % stride == 0 && pad_h % stride == 0,
            "input {pad_w}x{pad_h} is not divisible by stride {stride}"
        );
        let (cols, rows) = (pad_w / stride, pad_h / stride);
        let cells = cols * rows;

        let head = |kind: usize, name: &str, width: usize| -> Result<&'a [f32]> {
            let slice = outputs[level + kind * STRIDES.len()]
                .as_slice::<f32>()
                .map_err(|e| anyhow::anyhow!("{name} output not f32: {e}"))?;
            anyhow::ensure!(
                slice.len() == cells * width,
                "{name} length mismatch at stride {stride}: expected {}, got {}",
                cells * width,
                slice.len()
            );
            Ok(slice)
        };

        Ok(Self {
            stride,
            cols,
            rows,
            cls: head(0, "cls", 1)?,
            obj: head(1, "obj", 1)?,
            bbox: head(2, "bbox", 4)?,
            kps: head(3, "kps", 10)?,
        })
    }

    fn decode_into(&self, out: &mut Vec<f32>) {
        let stride = self.stride as f32;
        for row in 0..self.rows {
            for col in 0..self.cols {
                let cell = row * self.cols + col;
                let score = (self.cls[cell].clamp(0.0, 1.0) * self.obj[cell].clamp(0.0, 1.0)).sqrt();

                let delta = &self.bbox[cell * 4..cell * 4 + 4];
                let cx = (col as f32 + delta[0]) * stride;
                let cy = (row as f32 + delta[1]) * stride;
                let w = delta[2].exp() * stride;
                let h = delta[3].exp() * stride;
                out.extend_from_slice(&[cx - 0.5 * w, cy - 0.5 * h, w, h]);

                for point in self.kps[cell * 10..cell * 10 + 10].chunks_exact(2) {
                    out.push((point[0] + col as f32) * stride);
                    out.push((point[1] + row as f32) * stride);
                }

                out.push(if score.is_finite() { score } else { 0.0 });
            }
        }
    }
}

pub(crate) fn decode_heads(outputs: &[Tensor], input_size: InputSize) -> Result<Tensor> {
    anyhow::ensure!(
        outputs.len() == STRIDES.len() * HEADS,
        "YuNet decode expects {} tensors, got {}",
        STRIDES.len() * HEADS,
        outputs.len()
    );

    let pad = (
        (input_size.width as usize).div_ceil(32) * 32,
        (input_size.height as usize).div_ceil(32) * 32,
    );
    let levels = (0..STRIDES.len())
        .map(|level| StrideHeads::gather(outputs, level, pad))
        .collect::<Result<Vec<_>>>()?;

    let cells: usize = levels.iter().map(|level| level.rows * level.cols).sum();
    let mut fused = Vec::with_capacity(cells * YUNET_COLUMNS);
    for level in &levels {
        level.decode_into(&mut fused);
    }

    Tensor::from_shape(&[cells, YUNET_COLUMNS], &fused)
        .map_err(|e| anyhow::anyhow!("failed to build fused YuNet tensor: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loading_missing_model_fails() {
        let err = YuNetModel::load("missing.onnx", InputSize::default()).expect_err("missing");
        assert!(format!("{err}").contains("not found"));
    }

    #[test]
    fn invalid_model_produces_useful_error() {
        let mut temp = NamedTempFile::new().expect("temp file");
        temp.write_all(b"not a real onnx file").expect("write");

        let err = YuNetModel::load(temp.path(), InputSize::default())
            .expect_err("invalid ONNX should fail");
        let message = format!("{err:#}");
        assert!(
            message.contains("failed to parse ONNX"),
            "unexpected error message: {message}"
        );
    }

    fn synthetic_heads(input: InputSize, hot_cell: usize) -> Vec<Tensor> {
        let mut by_kind: [Vec<Tensor>; HEADS] = Default::default();
        for (level, &stride) in STRIDES.iter().enumerate() {
            let cells = (input.width as usize / stride) * (input.height as usize / stride);
            let mut cls = vec![0.0f32; cells];
            let mut obj = vec![0.0f32; cells];
            if level == 0 {
                cls[hot_cell] = 0.81;
                obj[hot_cell] = 1.0;
            }
            by_kind[0].push(Tensor::from_shape(&[cells], &cls).unwrap());
            by_kind[1].push(Tensor::from_shape(&[cells], &obj).unwrap());
            by_kind[2].push(Tensor::from_shape(&[cells, 4], &vec![0.0f32; cells * 4]).unwrap());
            by_kind[3].push(Tensor::from_shape(&[cells, 10], &vec![0.0f32; cells * 10]).unwrap());
        }
        by_kind.into_iter().flatten().collect()
    }

    #[test]
    fn decodes_anchor_free_heads() {
        let input = InputSize::new(64, 64);
        // Stride 8 grid is 8x8; cell 9 sits at row 1, col 1.
        let fused = decode_heads(&synthetic_heads(input, 9), input).expect("decode");

        let expected_rows = 64 + 16 + 4;
        assert_eq!(fused.shape(), &[expected_rows, YUNET_COLUMNS]);

        let data = fused.as_slice::<f32>().unwrap();
        let hot = &data[9 * YUNET_COLUMNS..10 * YUNET_COLUMNS];
        assert!((hot[YUNET_COLUMNS - 1] - 0.9).abs() < 1e-6);
        // exp(0) * 8 = 8 wide, centred on (8, 8).
        assert_eq!(&hot[..4], &[4.0, 4.0, 8.0, 8.0]);
        assert_eq!(&hot[4..6], &[8.0, 8.0]);
        assert_eq!(data[YUNET_COLUMNS - 1], 0.0);
    }

    #[test]
    fn decode_rejects_wrong_head_lengths() {
        let input = InputSize::new(64, 64);
        let mut heads = synthetic_heads(input, 0);
        heads[0] = Tensor::from_shape(&[3], &[0.0f32; 3]).unwrap();
        assert!(decode_heads(&heads, input).is_err());
        assert!(decode_heads(&heads[..5], input).is_err());
    }
}
