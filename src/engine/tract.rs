//! ONNX backend built on tract.

use std::path::Path;

use tract_onnx::prelude::*;

use crate::engine::backend::{resolve_input_shape, InferenceBackend, Session};
use crate::error::{Error, Result};

/// Runnable, optimized tract plan.
type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Loads ONNX files with tract-onnx.
#[derive(Debug, Default, Clone, Copy)]
pub struct TractBackend;

impl TractBackend {
    /// Create a tract backend.
    pub fn new() -> Self {
        Self
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &str {
        "tract"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Session>> {
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| Error::artifact(path, e))?;

        let input_shape =
            fact_shape(plan.model().input_fact(0)).map_err(|e| Error::artifact(path, e))?;
        let output_shape =
            fact_shape(plan.model().output_fact(0)).map_err(|e| Error::artifact(path, e))?;

        log::debug!(
            "Compiled {} (input {:?}, output {:?})",
            path.display(),
            input_shape,
            output_shape
        );

        Ok(Box::new(TractSession {
            plan,
            input_shape,
            output_shape,
        }))
    }
}

fn fact_shape(fact: TractResult<&TypedFact>) -> TractResult<Vec<i64>> {
    Ok(fact?
        .shape
        .iter()
        .map(|d| d.to_i64().unwrap_or(-1))
        .collect())
}

/// A compiled ONNX graph plus its first input/output shapes.
struct TractSession {
    plan: OnnxPlan,
    input_shape: Vec<i64>,
    output_shape: Vec<i64>,
}

impl Session for TractSession {
    fn evaluate(&self, inputs: &[f32]) -> Result<Vec<f32>> {
        let shape = resolve_input_shape(&self.input_shape, inputs.len())?;

        let tensor = Tensor::from_shape(&shape, inputs)
            .map_err(|e| Error::Inference(e.to_string()))?;
        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| Error::Inference(e.to_string()))?;

        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| Error::Inference("Model produced no output tensor".into()))?;
        let output = output
            .cast_to::<f32>()
            .map_err(|e| Error::Inference(e.to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| Error::Inference(e.to_string()))?;

        let values: Vec<f32> = view.iter().copied().collect();
        if values.is_empty() {
            return Err(Error::Inference("Model produced an empty output".into()));
        }
        Ok(values)
    }

    fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }
}
