//! Remote model download and on-disk caching.
//!
//! Models referenced by URL are stored as `<sha256(url)>.onnx` inside the
//! cache directory. The cache is bounded by size and evicts the least
//! recently accessed files first.

use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs4::fs_std::FileExt;
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::defaults;
use crate::error::{Error, Result};

/// Outcome of a fetch: where the model lives and whether it was already cached.
///
/// Holds the cache lock, so the file cannot be evicted until this is dropped.
#[derive(Debug)]
pub struct FetchedModel {
    pub path: PathBuf,
    pub cache_hit: bool,
    pub lock: CacheLock,
}

/// Exclusive hold on the cache directory, released on drop.
#[derive(Debug)]
pub struct CacheLock {
    _file: File,
}

impl CacheLock {
    fn acquire(dir: &Path) -> Result<Self> {
        let file = File::create(dir.join(defaults::CACHE_LOCK_FILE))?;
        file.lock_exclusive()
            .map_err(|e| Error::Cache(format!("Failed to lock cache: {}", e)))?;
        Ok(Self { _file: file })
    }
}

/// Downloads remote models into the local cache.
pub struct ModelFetcher {
    client: Client,
    config: Config,
}

impl ModelFetcher {
    /// Create a fetcher from environment configuration.
    pub fn new() -> Self {
        Self::with_config(Config::from_env())
    }

    /// Create a fetcher with explicit configuration.
    pub fn with_config(config: Config) -> Self {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { client, config }
    }

    /// Settings this fetcher was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory holding cached models.
    pub fn cache_dir(&self) -> &Path {
        &self.config.cache_dir
    }

    /// Cache location for `url`. A `#sha256=` fragment does not change it.
    pub fn cached_path(&self, url: &str) -> PathBuf {
        let (base, _) = split_digest(url);
        let digest = ::hex::encode(Sha256::digest(base.as_bytes()));
        self.cache_dir()
            .join(format!("{}.{}", digest, defaults::MODEL_EXTENSION))
    }

    /// Return a local copy of the model at `url`, downloading it on a miss.
    ///
    /// A URL ending in `#sha256=<hex>` is verified against that digest, both
    /// before a download is admitted to the cache and on every cache hit. A
    /// cached copy that does not match is discarded and downloaded again.
    pub fn fetch(&self, url: &str) -> Result<FetchedModel> {
        let (base, expected_sha256) = split_digest(url);

        fs::create_dir_all(self.cache_dir()).map_err(|e| {
            Error::Cache(format!(
                "Failed to create {}: {}",
                self.cache_dir().display(),
                e
            ))
        })?;

        // Serializes cache users across processes until the caller is done.
        let lock = CacheLock::acquire(self.cache_dir())?;

        let cached_path = self.cached_path(url);
        if cached_path.exists() {
            match expected_sha256 {
                Some(expected) if !digest_matches(&cached_path, expected)? => {
                    log::warn!("Cached copy of {} fails its sha256 pin, downloading again", base);
                    fs::remove_file(&cached_path)?;
                }
                _ => {
                    log::debug!("Cache hit for {}", base);
                    touch(&cached_path)?;
                    return Ok(FetchedModel {
                        path: cached_path,
                        cache_hit: true,
                        lock,
                    });
                }
            }
        }

        log::info!("Cache miss for {}, downloading", base);

        let partial_path = cached_path.with_extension(defaults::PARTIAL_EXTENSION);
        let mut guard = PartialFile::new(&partial_path);

        self.download_with_retry(base, &partial_path)?;

        if let Some(expected) = expected_sha256 {
            let actual = file_sha256(&partial_path)?;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::Integrity {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        let size = fs::metadata(&partial_path)?.len();
        self.evict_if_needed(size)?;

        fs::rename(&partial_path, &cached_path)?;
        guard.commit();

        log::info!("Cached {} ({} bytes)", base, size);
        Ok(FetchedModel {
            path: cached_path,
            cache_hit: false,
            lock,
        })
    }

    /// Delete everything in the cache directory. Missing directory is a no-op.
    pub fn clear_cache(&self) -> Result<()> {
        let dir = self.cache_dir();
        if !dir.exists() {
            return Ok(());
        }

        for entry in fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }

        log::info!("Cleared model cache at {}", dir.display());
        Ok(())
    }

    /// Total bytes held by cached models.
    pub fn cache_size(&self) -> Result<u64> {
        Ok(self
            .cached_models()?
            .iter()
            .map(|(_, _, size)| size)
            .sum())
    }

    fn download_with_retry(&self, url: &str, dest: &Path) -> Result<()> {
        let attempts = self.config.http_retry_attempts.max(1);

        for attempt in 1..=attempts {
            match self.download_file(url, dest) {
                Ok(()) => return Ok(()),
                Err(e) if attempt == attempts => {
                    log::error!("Giving up on {} after {} attempts: {}", url, attempts, e);
                    return Err(e);
                }
                Err(e) => {
                    log::warn!(
                        "Download attempt {}/{} for {} failed: {}, retrying...",
                        attempt,
                        attempts,
                        url,
                        e
                    );
                    std::thread::sleep(self.config.http_retry_delay * attempt);
                }
            }
        }

        Err(Error::Network(format!("Download of {} failed", url)))
    }

    fn download_file(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self.client.get(url).send()?;

        if !response.status().is_success() {
            return Err(Error::Network(format!(
                "HTTP {} for {}",
                response.status(),
                url
            )));
        }

        let mut file = File::create(dest)?;
        io::copy(&mut response, &mut file)?;
        file.sync_all()?;
        Ok(())
    }

    /// Remove least recently accessed models until `incoming` more bytes fit.
    fn evict_if_needed(&self, incoming: u64) -> Result<()> {
        let limit = self.config.cache_size_limit;
        let files = self.cached_models()?;
        let mut current: u64 = files.iter().map(|(_, _, size)| size).sum();

        if current + incoming <= limit {
            return Ok(());
        }

        let target = limit.saturating_sub(incoming);
        for (path, _, size) in files {
            if current <= target {
                break;
            }
            log::debug!("Evicting {} ({} bytes)", path.display(), size);
            fs::remove_file(&path)?;
            current -= size;
        }

        Ok(())
    }

    /// Cached model files, oldest access first.
    fn cached_models(&self) -> Result<Vec<(PathBuf, SystemTime, u64)>> {
        let dir = self.cache_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(dir)?.flatten() {
            let path = entry.path();
            let is_model = path.extension().and_then(|e| e.to_str())
                == Some(defaults::MODEL_EXTENSION);
            if !path.is_file() || !is_model {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                let accessed = metadata
                    .accessed()
                    .or_else(|_| metadata.modified())
                    .unwrap_or_else(|_| SystemTime::now());
                files.push((path, accessed, metadata.len()));
            }
        }

        files.sort_by_key(|(_, accessed, _)| *accessed);
        Ok(files)
    }
}

impl Default for ModelFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// True for locations the fetcher handles.
pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Split `url#sha256=<hex>` into the request URL and the expected digest.
fn split_digest(url: &str) -> (&str, Option<&str>) {
    match url.rsplit_once("#sha256=") {
        Some((base, digest)) if !digest.is_empty() => (base, Some(digest)),
        _ => (url, None),
    }
}

fn file_sha256(path: &Path) -> Result<String> {
    Ok(::hex::encode(Sha256::digest(fs::read(path)?)))
}

fn digest_matches(path: &Path, expected: &str) -> Result<bool> {
    Ok(file_sha256(path)?.eq_ignore_ascii_case(expected))
}

/// Refresh the access time used for LRU ordering.
fn touch(path: &Path) -> Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_times(FileTimes::new().set_accessed(SystemTime::now()))?;
    Ok(())
}

/// Deletes an in-progress download unless it was committed.
struct PartialFile<'a> {
    path: &'a Path,
    committed: bool,
}

impl<'a> PartialFile<'a> {
    fn new(path: &'a Path) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(&mut self) {
        self.committed = true;
    }
}

impl Drop for PartialFile<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;
    use tiny_http::{Response, Server};

    fn test_fetcher(dir: &Path) -> ModelFetcher {
        let config = Config {
            http_timeout: Duration::from_secs(5),
            http_retry_attempts: 1,
            http_retry_delay: Duration::from_millis(0),
            ..Config::default()
        }
        .with_cache_dir(dir);
        ModelFetcher::with_config(config)
    }

    /// Serve `count` requests with `status` and `body`, then stop.
    fn serve(status: u16, body: &'static [u8], count: usize) -> (String, thread::JoinHandle<()>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let handle = thread::spawn(move || {
            for _ in 0..count {
                if let Ok(request) = server.recv() {
                    let response = Response::from_data(body.to_vec()).with_status_code(status);
                    let _ = request.respond(response);
                }
            }
        });
        (format!("http://127.0.0.1:{}", port), handle)
    }

    #[test]
    fn test_is_remote() {
        assert!(is_remote("https://example.com/model.onnx"));
        assert!(is_remote("http://localhost/model.onnx"));
        assert!(!is_remote("/models/linear.onnx"));
        assert!(!is_remote("models/https.onnx"));
    }

    #[test]
    fn test_split_digest() {
        assert_eq!(split_digest("http://h/m.onnx"), ("http://h/m.onnx", None));
        assert_eq!(
            split_digest("http://h/m.onnx#sha256=abc"),
            ("http://h/m.onnx", Some("abc"))
        );
        assert_eq!(split_digest("http://h/m.onnx#sha256="), ("http://h/m.onnx#sha256=", None));
    }

    #[test]
    fn test_cached_path_ignores_digest_fragment() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(dir.path());
        let plain = fetcher.cached_path("http://h/m.onnx");
        assert_eq!(plain, fetcher.cached_path("http://h/m.onnx#sha256=00ff"));
        assert!(plain.starts_with(dir.path()));
        assert_eq!(plain.extension().unwrap(), "onnx");
    }

    #[test]
    fn test_fetch_downloads_then_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(dir.path());
        let (base, server) = serve(200, b"onnxdata", 1);
        let url = format!("{}/ok_model.onnx", base);

        let first = fetcher.fetch(&url).expect("download should succeed");
        assert!(!first.cache_hit);
        assert_eq!(fs::read(&first.path).unwrap(), b"onnxdata");
        let first_path = first.path.clone();
        drop(first);

        let second = fetcher.fetch(&url).expect("cache should hit");
        assert!(second.cache_hit);
        assert_eq!(first_path, second.path);
        assert!(!first_path.with_extension("onnx.part").exists());

        server.join().unwrap();
    }

    #[test]
    fn test_fetch_server_error_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(dir.path());
        let (base, server) = serve(500, b"boom", 1);
        let url = format!("{}/server_error_model.onnx", base);

        let err = fetcher.fetch(&url).unwrap_err();
        assert!(matches!(err, Error::Network(_)));

        let cached = fetcher.cached_path(&url);
        assert!(!cached.exists(), "final cache file should not exist");
        assert!(!cached.with_extension("onnx.part").exists(), "partial file should be cleaned up");

        server.join().unwrap();
    }

    #[test]
    fn test_fetch_rejects_digest_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(dir.path());
        let (base, server) = serve(200, b"onnxdata", 1);
        let url = format!("{}/pinned.onnx#sha256={}", base, "0".repeat(64));

        let err = fetcher.fetch(&url).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert!(!fetcher.cached_path(&url).exists());

        server.join().unwrap();
    }

    #[test]
    fn test_cached_copy_failing_digest_is_downloaded_again() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(dir.path());
        let (base, server) = serve(200, b"onnxdata", 1);
        let digest = ::hex::encode(Sha256::digest(b"onnxdata"));
        let url = format!("{}/pinned.onnx#sha256={}", base, digest);

        fs::create_dir_all(fetcher.cache_dir()).unwrap();
        fs::write(fetcher.cached_path(&url), b"tampered").unwrap();

        let fetched = fetcher.fetch(&url).unwrap();
        assert!(!fetched.cache_hit);
        assert_eq!(fs::read(&fetched.path).unwrap(), b"onnxdata");

        server.join().unwrap();
    }

    #[test]
    fn test_cached_copy_failing_digest_is_never_returned() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(dir.path());
        let (base, server) = serve(200, b"onnxdata", 1);
        let url = format!("{}/pinned.onnx#sha256={}", base, "0".repeat(64));

        fs::create_dir_all(fetcher.cache_dir()).unwrap();
        fs::write(fetcher.cached_path(&url), b"tampered").unwrap();

        let err = fetcher.fetch(&url).unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
        assert!(!fetcher.cached_path(&url).exists());

        server.join().unwrap();
    }

    #[test]
    fn test_unpinned_url_uses_cached_copy_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(dir.path());
        let url = "http://127.0.0.1:9/unpinned.onnx";

        fs::create_dir_all(fetcher.cache_dir()).unwrap();
        fs::write(fetcher.cached_path(url), b"anything").unwrap();

        let fetched = fetcher.fetch(url).unwrap();
        assert!(fetched.cache_hit);
    }

    #[test]
    fn test_fetched_model_blocks_eviction_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_size_limit: 10,
            http_retry_attempts: 1,
            http_retry_delay: Duration::from_millis(0),
            ..Config::default()
        }
        .with_cache_dir(dir.path());
        let fetcher = std::sync::Arc::new(ModelFetcher::with_config(config));
        let (base, server) = serve(200, b"onnxdata", 2);

        let held = fetcher.fetch(&format!("{}/held.onnx", base)).unwrap();

        let other = {
            let fetcher = std::sync::Arc::clone(&fetcher);
            let url = format!("{}/other.onnx", base);
            thread::spawn(move || fetcher.fetch(&url).map(|fetched| fetched.path))
        };

        thread::sleep(Duration::from_millis(200));
        assert!(!other.is_finished(), "second fetch should wait for the lock");
        assert!(held.path.exists());

        let held_path = held.path.clone();
        drop(held);

        let other_path = other.join().unwrap().unwrap();
        assert!(other_path.exists());
        assert!(!held_path.exists(), "older model should be evicted once released");

        server.join().unwrap();
    }

    #[test]
    fn test_fetch_accepts_matching_digest() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(dir.path());
        let (base, server) = serve(200, b"onnxdata", 1);
        let digest = ::hex::encode(Sha256::digest(b"onnxdata"));
        let url = format!("{}/pinned.onnx#sha256={}", base, digest);

        let fetched = fetcher.fetch(&url).unwrap();
        assert!(fetched.path.exists());

        server.join().unwrap();
    }

    #[test]
    fn test_eviction_removes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            cache_size_limit: 10,
            ..Config::default()
        }
        .with_cache_dir(dir.path());
        let fetcher = ModelFetcher::with_config(config);

        let old = dir.path().join("old.onnx");
        let new = dir.path().join("new.onnx");
        fs::write(&old, b"aaaa").unwrap();
        fs::write(&new, b"bbbb").unwrap();

        let past = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_times(FileTimes::new().set_accessed(past))
            .unwrap();
        touch(&new).unwrap();

        fetcher.evict_if_needed(4).unwrap();

        assert!(!old.exists(), "oldest file should be evicted");
        assert!(new.exists());
        assert_eq!(fetcher.cache_size().unwrap(), 4);
    }

    #[test]
    fn test_clear_cache_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = test_fetcher(&dir.path().join("cache"));

        fetcher.clear_cache().unwrap();

        fs::create_dir_all(fetcher.cache_dir()).unwrap();
        let dummy = fetcher.cache_dir().join("dummy.onnx");
        fs::write(&dummy, b"x").unwrap();
        assert_eq!(fetcher.cache_size().unwrap(), 1);

        fetcher.clear_cache().unwrap();
        assert!(!dummy.exists());
        assert_eq!(fetcher.cache_size().unwrap(), 0);
    }

    #[test]
    fn test_partial_file_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("dropped.onnx.part");
        let kept = dir.path().join("kept.onnx.part");
        fs::write(&dropped, b"x").unwrap();
        fs::write(&kept, b"x").unwrap();

        drop(PartialFile::new(&dropped));
        let mut guard = PartialFile::new(&kept);
        guard.commit();
        drop(guard);

        assert!(!dropped.exists());
        assert!(kept.exists());
    }
}
