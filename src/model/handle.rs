//! A single loaded model.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::engine::Session;
use crate::error::Result;

/// Metadata describing a loaded model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Registry name
    pub name: String,
    /// Location the model was loaded from
    pub source_path: String,
    /// First input shape, dynamic dimensions as -1
    pub input_shape: Vec<i64>,
    /// First output shape, dynamic dimensions as -1
    pub output_shape: Vec<i64>,
    /// Seconds since the Unix epoch
    pub loaded_at: u64,
}

/// Owns one model's inference session.
///
/// The session is released when the handle is dropped. The registry shares
/// handles through `Arc`, so that happens when the last prediction holding
/// a claim finishes.
pub struct ModelHandle {
    name: String,
    source_path: PathBuf,
    loaded_at: SystemTime,
    session: Box<dyn Session>,
}

impl ModelHandle {
    /// Wrap an opened session, stamping the load time.
    pub fn new(
        name: impl Into<String>,
        source_path: impl Into<PathBuf>,
        session: Box<dyn Session>,
    ) -> Self {
        Self {
            name: name.into(),
            source_path: source_path.into(),
            loaded_at: SystemTime::now(),
            session,
        }
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location the model was loaded from.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Wall-clock load time.
    pub fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    /// Evaluate the session on `inputs`.
    pub fn evaluate(&self, inputs: &[f32]) -> Result<Vec<f32>> {
        self.session.evaluate(inputs)
    }

    /// Metadata snapshot for this model.
    pub fn info(&self) -> ModelInfo {
        ModelInfo {
            name: self.name.clone(),
            source_path: self.source_path.to_string_lossy().to_string(),
            input_shape: self.session.input_shape().to_vec(),
            output_shape: self.session.output_shape().to_vec(),
            loaded_at: self
                .loaded_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("name", &self.name)
            .field("source_path", &self.source_path)
            .field("loaded_at", &self.loaded_at)
            .finish_non_exhaustive()
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        log::debug!("Released model '{}'", self.name);
    }
}
