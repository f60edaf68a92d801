//! Model handles, resolution and the registry.

pub mod handle;
pub mod registry;
pub mod resolver;
mod stats;

pub use handle::{ModelHandle, ModelInfo};
pub use registry::ModelRegistry;
pub use resolver::{ModelResolver, ModelSource, ResolvedModel};
pub use stats::RegistryStats;
