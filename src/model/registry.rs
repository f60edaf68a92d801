//! Registry of loaded models.
//!
//! Names map to `Arc<ModelHandle>` behind a `parking_lot::RwLock`. The lock
//! guards the map only: sessions are opened before it is taken, predictions
//! clone the handle out and evaluate after releasing it, and handles that
//! leave the map are dropped once the lock is gone.
//!
//! Per-name lifecycle: UNLOADED -> load -> LOADED -> unload -> UNLOADED.
//! Loading a name that is already LOADED swaps in the new handle.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::config::Config;
use crate::engine::InferenceBackend;
use crate::error::{Error, Result};
use crate::model::handle::{ModelHandle, ModelInfo};
use crate::model::resolver::ModelResolver;
use crate::model::stats::{RegistryStats, StatsCounters};

/// Concurrency-safe mapping from model name to loaded model.
pub struct ModelRegistry {
    /// Live handles by name
    entries: RwLock<HashMap<String, Arc<ModelHandle>>>,
    /// Opens model files into sessions
    backend: Arc<dyn InferenceBackend>,
    /// Turns paths and URLs into local files
    resolver: ModelResolver,
    counters: StatsCounters,
}

impl ModelRegistry {
    /// Create an empty registry using `backend`, configured from the environment.
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self::with_resolver(backend, ModelResolver::new())
    }

    /// Create an empty registry with explicit cache and download settings.
    pub fn with_config(backend: Arc<dyn InferenceBackend>, config: Config) -> Self {
        Self::with_resolver(backend, ModelResolver::with_config(config))
    }

    /// Create an empty registry around an existing resolver.
    pub fn with_resolver(backend: Arc<dyn InferenceBackend>, resolver: ModelResolver) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            backend,
            resolver,
            counters: StatsCounters::default(),
        }
    }

    /// Backend used to open models.
    pub fn backend(&self) -> &Arc<dyn InferenceBackend> {
        &self.backend
    }

    /// Resolver used to turn locations into files.
    pub fn resolver(&self) -> &ModelResolver {
        &self.resolver
    }

    /// Load the model at `location` under `name`.
    ///
    /// `location` is a file path or an `http(s)://` URL. An existing model
    /// with the same name is replaced and released. On failure the registry
    /// is left exactly as it was.
    pub fn load(&self, name: &str, location: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::EmptyModelName);
        }

        let handle = match self.open_handle(name, location) {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                StatsCounters::bump(&self.counters.load_failures);
                log::warn!("Failed to load model '{}' from {}: {}", name, location, e);
                return Err(e);
            }
        };

        let previous = self.entries.write().insert(name.to_string(), handle);

        StatsCounters::bump(&self.counters.loads);
        if previous.is_some() {
            StatsCounters::bump(&self.counters.replacements);
            log::info!("Replaced model '{}' with {}", name, location);
        } else {
            log::info!("Loaded model '{}' from {}", name, location);
        }

        // Released here, outside the lock, unless a prediction still holds it.
        drop(previous);
        Ok(())
    }

    fn open_handle(&self, name: &str, location: &str) -> Result<ModelHandle> {
        // Keeps a cached file's lock until the session is compiled.
        let resolved = self.resolver.resolve(location)?;
        log::debug!(
            "Opening '{}' from {} ({})",
            name,
            resolved.path.display(),
            resolved.source
        );

        let session = self.backend.open(&resolved.path).map_err(|e| match e {
            Error::Artifact { .. } | Error::FeatureNotEnabled(_) => e,
            other => Error::artifact(&resolved.path, other),
        })?;

        Ok(ModelHandle::new(name, resolved.location, session))
    }

    /// Shared claim on the handle registered under `name`.
    pub fn handle(&self, name: &str) -> Option<Arc<ModelHandle>> {
        self.entries.read().get(name).cloned()
    }

    /// Run the model registered under `name` on `inputs`.
    ///
    /// Returns the first output flattened in row-major order. Never loads
    /// anything: an unknown name fails with [`Error::NotLoaded`].
    pub fn predict(&self, name: &str, inputs: &[f32]) -> Result<Vec<f32>> {
        StatsCounters::bump(&self.counters.predictions);

        let result = self
            .handle(name)
            .ok_or_else(|| Error::NotLoaded(name.to_string()))
            .and_then(|handle| handle.evaluate(inputs))
            .and_then(|output| {
                if output.is_empty() {
                    Err(Error::Inference(format!("Model '{}' produced no values", name)))
                } else {
                    Ok(output)
                }
            });

        if let Err(ref e) = result {
            StatsCounters::bump(&self.counters.prediction_failures);
            log::debug!("Prediction on '{}' failed: {}", name, e);
        }
        result
    }

    /// First value of [`predict`](Self::predict).
    pub fn predict_scalar(&self, name: &str, inputs: &[f32]) -> Result<f32> {
        let output = self.predict(name, inputs)?;
        output
            .first()
            .copied()
            .ok_or_else(|| Error::Inference(format!("Model '{}' produced no values", name)))
    }

    /// Predict from a packed BLOB of native-endian `f32` values.
    pub fn predict_blob(&self, name: &str, blob: &[u8]) -> Result<Vec<f32>> {
        let inputs = decode_f32_blob(blob)?;
        self.predict(name, &inputs)
    }

    /// Remove and release `name`. Unknown names are a no-op.
    pub fn unload(&self, name: &str) {
        let removed = self.entries.write().remove(name);

        if let Some(handle) = removed {
            StatsCounters::bump(&self.counters.unloads);
            log::info!("Unloaded model '{}'", name);
            drop(handle);
        } else {
            log::debug!("Unload of '{}' ignored: not loaded", name);
        }
    }

    /// Sorted snapshot of loaded names.
    pub fn list_loaded(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// [`list_loaded`](Self::list_loaded) as a JSON array.
    pub fn list_loaded_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.list_loaded())?)
    }

    /// Metadata for the model registered under `name`.
    pub fn model_info(&self, name: &str) -> Result<ModelInfo> {
        self.handle(name)
            .map(|handle| handle.info())
            .ok_or_else(|| Error::NotLoaded(name.to_string()))
    }

    /// Whether `name` currently maps to a model.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Number of loaded models.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when no model is loaded.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove and release every model. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let drained: Vec<Arc<ModelHandle>> = {
            let mut entries = self.entries.write();
            entries.drain().map(|(_, handle)| handle).collect()
        };

        let count = drained.len();
        if count > 0 {
            StatsCounters::add(&self.counters.unloads, count as u64);
            log::info!("Released {} model(s)", count);
        }
        drop(drained);
        count
    }

    /// Snapshot of the registry counters.
    pub fn stats(&self) -> RegistryStats {
        self.counters.snapshot(self.len())
    }

    /// Delete every downloaded model from the cache.
    pub fn clear_cache(&self) -> Result<()> {
        self.resolver.fetcher().clear_cache()
    }

    /// Bytes used by downloaded models.
    pub fn cache_size(&self) -> Result<u64> {
        self.resolver.fetcher().cache_size()
    }
}

impl Drop for ModelRegistry {
    fn drop(&mut self) {
        let released = self.clear();
        if released > 0 {
            log::debug!("Registry dropped with {} model(s) still loaded", released);
        }
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("backend", &self.backend.name())
            .field("loaded", &self.list_loaded())
            .finish()
    }
}

/// Decode a BLOB of packed native-endian `f32` values.
pub fn decode_f32_blob(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(Error::InvalidBlobSize(blob.len()));
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
