//! Model location resolution.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::engine::fetch::{is_remote, CacheLock, ModelFetcher};
use crate::error::{Error, Result};

/// Where a resolved model file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    /// Path given by the caller
    Local,
    /// Previously downloaded copy
    Cache,
    /// Downloaded by this call
    Remote,
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Cache => write!(f, "cache"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Result of resolving a model location.
///
/// For cached models this keeps the cache locked, so `path` stays on disk
/// until the value is dropped.
#[derive(Debug)]
pub struct ResolvedModel {
    /// Location as the caller wrote it
    pub location: String,
    /// Local file to open
    pub path: PathBuf,
    pub source: ModelSource,
    /// Cache lock, held for remote models only
    pub cache_lock: Option<CacheLock>,
}

/// Maps model locations (paths or URLs) to local files.
pub struct ModelResolver {
    fetcher: ModelFetcher,
}

impl ModelResolver {
    /// Create a resolver configured from the environment.
    pub fn new() -> Self {
        Self::with_config(Config::from_env())
    }

    /// Create a resolver with explicit cache and download settings.
    pub fn with_config(config: Config) -> Self {
        Self {
            fetcher: ModelFetcher::with_config(config),
        }
    }

    /// Downloader backing remote locations.
    pub fn fetcher(&self) -> &ModelFetcher {
        &self.fetcher
    }

    /// Resolve `location` to a local model file.
    ///
    /// # Arguments
    /// * `location` - either:
    ///   - Local path: `/path/to/model.onnx` or `./relative/model.onnx`
    ///   - URL: `https://host/model.onnx`, optionally `#sha256=<hex>`
    pub fn resolve(&self, location: &str) -> Result<ResolvedModel> {
        let location = location.trim();
        if location.is_empty() {
            return Err(Error::InvalidArgument("Model location must not be empty".into()));
        }

        if is_remote(location) {
            return self.resolve_remote(location);
        }

        let path = PathBuf::from(location);
        if !path.is_file() {
            return Err(Error::artifact(path, "No such file"));
        }

        Ok(ResolvedModel {
            location: location.to_string(),
            path,
            source: ModelSource::Local,
            cache_lock: None,
        })
    }

    fn resolve_remote(&self, url: &str) -> Result<ResolvedModel> {
        let fetched = self.fetcher.fetch(url).map_err(|e| match e {
            Error::Io(io) => Error::artifact(url, io),
            other => other,
        })?;

        Ok(ResolvedModel {
            location: url.to_string(),
            path: fetched.path,
            source: if fetched.cache_hit {
                ModelSource::Cache
            } else {
                ModelSource::Remote
            },
            cache_lock: Some(fetched.lock),
        })
    }
}

impl Default for ModelResolver {
    fn default() -> Self {
        Self::new()
    }
}
