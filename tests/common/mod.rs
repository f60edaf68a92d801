//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use grove::{Config, Error, InferenceBackend, ModelRegistry, Result, Session};
use serde::Deserialize;

/// Weights for the linear test model: y = w . x + b.
#[derive(Debug, Clone, Deserialize)]
struct LinearWeights {
    weights: Vec<f32>,
    bias: f32,
}

/// Backend reading linear models from small JSON files.
///
/// Counts live sessions so tests can observe releases.
#[derive(Default)]
pub struct LinearBackend {
    live: Arc<AtomicUsize>,
}

impl LinearBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl InferenceBackend for LinearBackend {
    fn name(&self) -> &str {
        "linear"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Session>> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::artifact(path, e))?;
        let model: LinearWeights =
            serde_json::from_str(&text).map_err(|e| Error::artifact(path, e))?;
        if model.weights.is_empty() {
            return Err(Error::artifact(path, "no weights"));
        }

        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(LinearSession {
            input_shape: vec![-1, model.weights.len() as i64],
            model,
            live: self.live.clone(),
        }))
    }
}

struct LinearSession {
    model: LinearWeights,
    input_shape: Vec<i64>,
    live: Arc<AtomicUsize>,
}

impl Session for LinearSession {
    fn evaluate(&self, inputs: &[f32]) -> Result<Vec<f32>> {
        let width = self.model.weights.len();
        if inputs.is_empty() || inputs.len() % width != 0 {
            return Err(Error::ShapeMismatch {
                expected: format!("{:?}", self.input_shape),
                actual: format!("{} values", inputs.len()),
            });
        }

        Ok(inputs
            .chunks(width)
            .map(|row| {
                row.iter()
                    .zip(&self.model.weights)
                    .map(|(x, w)| x * w)
                    .sum::<f32>()
                    + self.model.bias
            })
            .collect())
    }

    fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[i64] {
        &[-1, 1]
    }
}

impl Drop for LinearSession {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Write a linear model file and return its path.
pub fn write_linear_model(dir: &Path, file: &str, weights: &[f32], bias: f32) -> PathBuf {
    let path = dir.join(file);
    let doc = serde_json::json!({ "weights": weights, "bias": bias });
    std::fs::write(&path, doc.to_string()).unwrap();
    path
}

/// The reference model: three weights of 0.25 and bias 0.25, so
/// `[1, 2, 3]` maps to 1.75.
pub fn write_reference_model(dir: &Path) -> PathBuf {
    write_linear_model(dir, "linear.json", &[0.25, 0.25, 0.25], 0.25)
}

/// Registry backed by [`LinearBackend`] with its cache inside `dir`.
pub fn linear_registry(dir: &Path) -> (ModelRegistry, Arc<LinearBackend>) {
    let backend = Arc::new(LinearBackend::new());
    let config = Config::default().with_cache_dir(dir.join("cache"));
    (ModelRegistry::with_config(backend.clone(), config), backend)
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

/// Encode the reference model as an ONNX graph: `MatMul(X, W) + B`.
#[cfg(feature = "tract")]
pub fn write_onnx_reference_model(dir: &Path) -> PathBuf {
    use prost::Message;
    use tract_onnx::pb;

    const FLOAT: i32 = 1;

    fn tensor_type(dims: &[i64]) -> pb::TypeProto {
        let dim = dims
            .iter()
            .map(|&d| pb::tensor_shape_proto::Dimension {
                value: Some(pb::tensor_shape_proto::dimension::Value::DimValue(d)),
                ..Default::default()
            })
            .collect();
        pb::TypeProto {
            value: Some(pb::type_proto::Value::TensorType(pb::type_proto::Tensor {
                elem_type: FLOAT,
                shape: Some(pb::TensorShapeProto { dim }),
            })),
            ..Default::default()
        }
    }

    fn value_info(name: &str, dims: &[i64]) -> pb::ValueInfoProto {
        pb::ValueInfoProto {
            name: name.to_string(),
            r#type: Some(tensor_type(dims)),
            ..Default::default()
        }
    }

    fn initializer(name: &str, dims: &[i64], values: &[f32]) -> pb::TensorProto {
        pb::TensorProto {
            name: name.to_string(),
            dims: dims.to_vec(),
            data_type: FLOAT,
            float_data: values.to_vec(),
            ..Default::default()
        }
    }

    fn node(op_type: &str, inputs: &[&str], output: &str) -> pb::NodeProto {
        pb::NodeProto {
            name: format!("{}_node", op_type.to_lowercase()),
            op_type: op_type.to_string(),
            input: inputs.iter().map(|s| s.to_string()).collect(),
            output: vec![output.to_string()],
            ..Default::default()
        }
    }

    let graph = pb::GraphProto {
        name: "linear".to_string(),
        node: vec![node("MatMul", &["X", "W"], "XW"), node("Add", &["XW", "B"], "Y")],
        initializer: vec![
            initializer("W", &[3, 1], &[0.25, 0.25, 0.25]),
            initializer("B", &[1], &[0.25]),
        ],
        input: vec![value_info("X", &[1, 3])],
        output: vec![value_info("Y", &[1, 1])],
        ..Default::default()
    };

    let model = pb::ModelProto {
        ir_version: 7,
        opset_import: vec![pb::OperatorSetIdProto {
            domain: String::new(),
            version: 13,
        }],
        producer_name: "grove-tests".to_string(),
        graph: Some(graph),
        ..Default::default()
    };

    let path = dir.join("linear.onnx");
    std::fs::write(&path, model.encode_to_vec()).unwrap();
    path
}
