//! Runtime configuration resolved from the environment.

use std::path::PathBuf;
use std::time::Duration;

use crate::defaults;

/// Settings for the remote model cache and downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding downloaded models
    pub cache_dir: PathBuf,
    /// Upper bound on the cache size in bytes
    pub cache_size_limit: u64,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Download attempts before giving up
    pub http_retry_attempts: u32,
    /// Base delay between attempts; attempt `n` waits `n * delay`
    pub http_retry_delay: Duration,
}

impl Config {
    /// Resolve configuration from `GROVE_*` environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            cache_dir: lookup("GROVE_CACHE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_dir),
            cache_size_limit: parsed("GROVE_CACHE_SIZE_LIMIT")
                .unwrap_or(defaults::CACHE_SIZE_LIMIT_BYTES),
            http_timeout: Duration::from_secs(
                parsed("GROVE_HTTP_TIMEOUT").unwrap_or(defaults::HTTP_TIMEOUT_SECS),
            ),
            http_retry_attempts: parsed("GROVE_HTTP_RETRY_ATTEMPTS")
                .and_then(|v| u32::try_from(v).ok())
                .filter(|&v| v > 0)
                .unwrap_or(defaults::HTTP_RETRY_ATTEMPTS),
            http_retry_delay: Duration::from_millis(
                parsed("GROVE_HTTP_RETRY_DELAY").unwrap_or(defaults::HTTP_RETRY_DELAY_MS),
            ),
        }
    }

    /// Same settings with a different cache directory.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_size_limit: defaults::CACHE_SIZE_LIMIT_BYTES,
            http_timeout: Duration::from_secs(defaults::HTTP_TIMEOUT_SECS),
            http_retry_attempts: defaults::HTTP_RETRY_ATTEMPTS,
            http_retry_delay: Duration::from_millis(defaults::HTTP_RETRY_DELAY_MS),
        }
    }
}

/// `<platform cache dir>/grove/models`, or the temp dir when there is none.
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(defaults::CACHE_DIR_NAME)
        .join("models")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.cache_size_limit, defaults::CACHE_SIZE_LIMIT_BYTES);
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.http_retry_attempts, 3);
        assert_eq!(config.http_retry_delay, Duration::from_millis(1000));
        assert!(config.cache_dir.ends_with("grove/models"));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("GROVE_CACHE_DIR", "/var/cache/models"),
            ("GROVE_CACHE_SIZE_LIMIT", "2048"),
            ("GROVE_HTTP_TIMEOUT", "5"),
            ("GROVE_HTTP_RETRY_ATTEMPTS", "7"),
            ("GROVE_HTTP_RETRY_DELAY", "10"),
        ]));

        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/models"));
        assert_eq!(config.cache_size_limit, 2048);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.http_retry_attempts, 7);
        assert_eq!(config.http_retry_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("GROVE_CACHE_SIZE_LIMIT", "lots"),
            ("GROVE_HTTP_RETRY_ATTEMPTS", "0"),
            ("GROVE_CACHE_DIR", "  "),
        ]));

        assert_eq!(config, Config::default());
    }
}
