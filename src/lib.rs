//! Grove - embedded ONNX model registry for in-process inference.
//!
//! Models are loaded under caller-chosen names, evaluated concurrently from
//! any number of threads, and released when unloaded. A C ABI in [`ffi`]
//! exposes one process-wide registry to host programs such as database
//! extensions.

mod defaults;
pub mod config;
pub mod error;

pub mod engine;
pub mod ffi;
pub mod model;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};

pub use engine::fetch::{CacheLock, FetchedModel, ModelFetcher};
pub use engine::{default_backend, DisabledBackend, InferenceBackend, Session};
#[cfg(feature = "tract")]
pub use engine::TractBackend;

pub use model::{
    ModelHandle, ModelInfo, ModelRegistry, ModelResolver, ModelSource, RegistryStats,
    ResolvedModel,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
