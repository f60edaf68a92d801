//! Inference backends and remote model retrieval.
//!
//! This module provides:
//! - The backend contract (`backend`)
//! - The tract-onnx implementation (`tract`, behind the `tract` feature)
//! - Download and caching of remote models (`fetch`)

pub mod backend;
pub mod fetch;
#[cfg(feature = "tract")]
pub mod tract;

use std::path::Path;
use std::sync::Arc;

pub use backend::{InferenceBackend, Session};
pub use fetch::ModelFetcher;
#[cfg(feature = "tract")]
pub use tract::TractBackend;

use crate::error::{Error, Result};

/// The backend this build ships with.
pub fn default_backend() -> Arc<dyn InferenceBackend> {
    #[cfg(feature = "tract")]
    {
        Arc::new(TractBackend::new())
    }
    #[cfg(not(feature = "tract"))]
    {
        Arc::new(DisabledBackend)
    }
}

/// Stand-in used when no backend feature is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledBackend;

impl InferenceBackend for DisabledBackend {
    fn name(&self) -> &str {
        "disabled"
    }

    fn open(&self, _path: &Path) -> Result<Box<dyn Session>> {
        Err(Error::FeatureNotEnabled(
            "ONNX inference requires the 'tract' feature".into(),
        ))
    }
}
