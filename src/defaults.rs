//! Default values for cache and download settings.

/// Cache directory name under the platform cache root.
pub const CACHE_DIR_NAME: &str = "grove";
/// Cache size limit: 1 GiB.
pub const CACHE_SIZE_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;
pub const HTTP_TIMEOUT_SECS: u64 = 30;
pub const HTTP_RETRY_ATTEMPTS: u32 = 3;
pub const HTTP_RETRY_DELAY_MS: u64 = 1000;

/// Extension given to cached model files.
pub const MODEL_EXTENSION: &str = "onnx";
/// Extension given to in-progress downloads.
pub const PARTIAL_EXTENSION: &str = "onnx.part";
/// Lock file serializing cache writers across processes.
pub const CACHE_LOCK_FILE: &str = ".lock";
