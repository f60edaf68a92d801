//! Inference backend contract.
//!
//! The registry never touches tensors itself. A backend turns a model file
//! into a [`Session`], and a session turns a flat input vector into a flat
//! output vector. Releasing a session is dropping it.

use std::path::Path;

use crate::error::{Error, Result};

/// A loaded, runnable model.
///
/// Sessions are shared between caller threads through the registry, so
/// `evaluate` takes `&self` and must be safe to call concurrently.
pub trait Session: Send + Sync {
    /// Run the model on row-major `inputs` and return the first output,
    /// flattened in row-major order.
    fn evaluate(&self, inputs: &[f32]) -> Result<Vec<f32>>;

    /// Shape of the first input. Dynamic dimensions are -1.
    fn input_shape(&self) -> &[i64];

    /// Shape of the first output. Dynamic dimensions are -1.
    fn output_shape(&self) -> &[i64];
}

/// Opens model artifacts into sessions.
pub trait InferenceBackend: Send + Sync {
    /// Short backend identifier, e.g. `"tract"`.
    fn name(&self) -> &str;

    /// Open and compile the artifact at `path`.
    ///
    /// Any failure is reported as [`Error::Artifact`].
    fn open(&self, path: &Path) -> Result<Box<dyn Session>>;
}

/// Fit `len` flat values into a model input shape.
///
/// Fixed dimensions are kept. The first dynamic dimension absorbs the batch
/// size (`len / product(fixed dims)`); any further dynamic dimension becomes 1.
pub fn resolve_input_shape(input_shape: &[i64], len: usize) -> Result<Vec<usize>> {
    let mismatch = || Error::ShapeMismatch {
        expected: format!("{:?}", input_shape),
        actual: format!("{} values", len),
    };

    let per_row: usize = input_shape
        .iter()
        .filter(|&&d| d > 0)
        .map(|&d| d as usize)
        .product();
    let has_dynamic = input_shape.iter().any(|&d| d <= 0);

    if len == 0 || per_row == 0 {
        return Err(mismatch());
    }

    if !has_dynamic {
        return if len == per_row {
            Ok(input_shape.iter().map(|&d| d as usize).collect())
        } else {
            Err(mismatch())
        };
    }

    if len % per_row != 0 {
        return Err(mismatch());
    }

    let batch = len / per_row;
    let mut batch_assigned = false;
    Ok(input_shape
        .iter()
        .map(|&d| {
            if d > 0 {
                d as usize
            } else if !batch_assigned {
                batch_assigned = true;
                batch
            } else {
                1
            }
        })
        .collect())
}
