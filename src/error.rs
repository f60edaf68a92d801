//! Error types for Grove.

use std::path::PathBuf;

use thiserror::Error;

/// Grove error type.
#[derive(Error, Debug)]
pub enum Error {
    /// No live handle is registered under the name
    #[error("Model not loaded: {0}")]
    NotLoaded(String),

    /// Model artifact could not be opened or compiled
    #[error("Failed to load model from {path}: {reason}")]
    Artifact { path: PathBuf, reason: String },

    /// Inputs do not fit the model's expected input shape
    #[error("Invalid input shape: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Backend failure during evaluation
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Model name was empty
    #[error("Model name must not be empty")]
    EmptyModelName,

    /// Argument rejected at the binding boundary
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// BLOB length is not a whole number of f32 values
    #[error("Invalid BLOB size: length {0} is not a multiple of 4")]
    InvalidBlobSize(usize),

    /// Backend compiled out of this build
    #[error("Feature not enabled: {0}")]
    FeatureNotEnabled(String),

    /// Remote model download failed
    #[error("Network error: {0}")]
    Network(String),

    /// Downloaded content does not match the expected digest
    #[error("Integrity check failed: expected {expected}, got {actual}")]
    Integrity { expected: String, actual: String },

    /// Cache directory could not be prepared or locked
    #[error("Cache error: {0}")]
    Cache(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification surfaced to the binding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unreadable, malformed or unsupported artifact; raised only by `load`
    Artifact,
    /// Prediction against a name with no live handle
    NotLoaded,
    /// Inputs incompatible with the model
    ShapeMismatch,
    /// Bad argument at the call boundary
    InvalidArgument,
    /// Anything else
    Internal,
}

impl Error {
    /// Build an artifact error for `path`.
    pub fn artifact(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Artifact {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotLoaded(_) => ErrorKind::NotLoaded,
            Self::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Self::Artifact { .. }
            | Self::FeatureNotEnabled(_)
            | Self::Network(_)
            | Self::Integrity { .. }
            | Self::Cache(_)
            | Self::Http(_) => ErrorKind::Artifact,
            Self::EmptyModelName | Self::InvalidArgument(_) | Self::InvalidBlobSize(_) => {
                ErrorKind::InvalidArgument
            }
            Self::Inference(_) | Self::Json(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for Grove operations.
pub type Result<T> = std::result::Result<T, Error>;
