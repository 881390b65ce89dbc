//! Local track cache
//!
//! Turns the remote library bucket into a small on-disk working set holding
//! the track on air plus the prefetch lookahead.
//!
//! # Guarantees
//!
//! - Each object key maps to exactly one local file name.
//! - Concurrent requests for the same key share a single transfer; the
//!   in-flight map is locked only to register or retire a download.
//! - Transfers write to a `.part` file and rename into place, so a cached
//!   path is never observed half-written.
//! - Every successful access refreshes the file's modification time.
//!
//! # Example
//!
//! ```rust,ignore
//! use onair::cache::TrackCache;
//!
//! let cache = TrackCache::new(storage_client, "tmp/track_cache")?;
//! cache.prefetch(vec!["music/next.mp3".into()]);
//! let path = cache.get_local_path("music/now.mp3").await?;
//! cache.cleanup(&["music/now.mp3".into(), "music/next.mp3".into()]).await;
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::models::key_extension;
use crate::storage::StorageClient;

const PART_SUFFIX: &str = ".part";

/// Track cache errors
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Object could not be fetched from the store
    #[error("download of '{key}' failed: {reason}")]
    Download { key: String, reason: String },

    /// Object fetched but empty
    #[error("object '{key}' is empty or missing")]
    NotFound { key: String },

    /// Local filesystem failure
    #[error("cache I/O error at {path}: {reason}")]
    Io { path: String, reason: String },
}

impl CacheError {
    fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        // every cache failure only costs the current track
        true
    }
}

type DownloadOutcome = Option<Result<PathBuf, CacheError>>;

struct CacheInner {
    storage: StorageClient,
    dir: PathBuf,
    in_flight: Mutex<HashMap<String, watch::Receiver<DownloadOutcome>>>,
}

/// Deduplicating on-disk cache of library tracks
#[derive(Clone)]
pub struct TrackCache {
    inner: Arc<CacheInner>,
}

/// Retires an in-flight registration even if the downloading task is dropped
struct InFlightGuard<'a> {
    inner: &'a CacheInner,
    key: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.key);
    }
}

enum Role {
    Leader(watch::Sender<DownloadOutcome>),
    Follower(watch::Receiver<DownloadOutcome>),
}

impl TrackCache {
    /// Create a cache in `dir`, creating the directory
    pub fn new(storage: StorageClient, dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        Ok(Self {
            inner: Arc::new(CacheInner {
                storage,
                dir,
                in_flight: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Deterministic local file name for an object key
    pub fn file_name(key: &str) -> String {
        let digest = Sha256::digest(key.as_bytes());
        format!("{digest:x}{}", key_extension(key))
    }

    /// Local path a key is (or would be) cached at
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.inner.dir.join(Self::file_name(key))
    }

    /// Whether a key is fully cached
    pub async fn is_cached(&self, key: &str) -> bool {
        is_ready(&self.path_for(key)).await
    }

    /// Number of downloads currently in flight
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight().len()
    }

    fn lock_in_flight(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, watch::Receiver<DownloadOutcome>>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Return the local path for `key`, downloading it if needed
    ///
    /// Blocks on network I/O on a miss. Callers racing on the same key wait
    /// for the one transfer already in flight.
    pub async fn get_local_path(&self, key: &str) -> Result<PathBuf, CacheError> {
        let path = self.path_for(key);

        if is_ready(&path).await {
            touch(&path).await;
            crate::metrics::record_cache_request("hit");
            return Ok(path);
        }

        let role = {
            let mut in_flight = self.lock_in_flight();
            match in_flight.get(key) {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(key.to_string(), rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => {
                crate::metrics::record_cache_request("shared");
                let outcome = match rx.wait_for(Option::is_some).await {
                    Ok(outcome) => (*outcome).clone(),
                    Err(_) => None,
                };

                match outcome {
                    Some(Ok(path)) => {
                        touch(&path).await;
                        Ok(path)
                    }
                    Some(Err(e)) => Err(e),
                    None => Err(CacheError::Download {
                        key: key.to_string(),
                        reason: "download abandoned".to_string(),
                    }),
                }
            }
            Role::Leader(tx) => {
                let _guard = InFlightGuard {
                    inner: &self.inner,
                    key: key.to_string(),
                };

                // Another leader may have finished between the check and the registration
                let result = if is_ready(&path).await {
                    crate::metrics::record_cache_request("hit");
                    Ok(path.clone())
                } else {
                    crate::metrics::record_cache_request("miss");
                    tracing::info!(key = %key, "Cache miss, downloading");
                    self.download(key, &path).await.map(|_| path.clone())
                };

                if result.is_ok() {
                    touch(&path).await;
                }

                let _ = tx.send(Some(result.clone()));
                result
            }
        }
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<(), CacheError> {
        let started = std::time::Instant::now();
        let mut reader =
            self.inner
                .storage
                .download(key)
                .await
                .map_err(|e| CacheError::Download {
                    key: key.to_string(),
                    reason: format!("{e:#}"),
                })?;

        let part = part_path(dest);
        let mut file = tokio::fs::File::create(&part)
            .await
            .map_err(|e| CacheError::io(&part, e))?;

        let written = async {
            let bytes = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            Ok::<_, std::io::Error>(bytes)
        }
        .await;
        drop(file);

        let bytes = match written {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(CacheError::Download {
                    key: key.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        if bytes == 0 {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(CacheError::NotFound {
                key: key.to_string(),
            });
        }

        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| CacheError::io(dest, e))?;

        tracing::debug!(
            key = %key,
            bytes = bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Track cached"
        );
        Ok(())
    }

    /// Start background downloads for keys that are neither cached nor in flight
    ///
    /// Returns the spawned task handles; dropping them does not cancel the
    /// downloads.
    pub fn prefetch(&self, keys: Vec<String>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for key in keys {
            if self.lock_in_flight().contains_key(&key) {
                continue;
            }

            let cache = self.clone();
            handles.push(tokio::spawn(async move {
                if cache.is_cached(&key).await {
                    return;
                }
                tracing::debug!(key = %key, "Prefetching");
                if let Err(e) = cache.get_local_path(&key).await {
                    tracing::warn!(key = %key, error = %e, "Prefetch failed");
                }
            }));
        }

        handles
    }

    /// Delete cached files whose key is not in `keep_keys`
    ///
    /// Files belonging to in-flight downloads are left alone, including
    /// downloads that start while the directory is being scanned. Returns the
    /// number of files removed.
    pub async fn cleanup(&self, keep_keys: &[String]) -> usize {
        let protected: HashSet<String> = keep_keys.iter().map(|k| Self::file_name(k)).collect();
        let protected_parts: HashSet<String> = protected
            .iter()
            .map(|name| format!("{name}{PART_SUFFIX}"))
            .collect();

        let mut entries = match tokio::fs::read_dir(&self.inner.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.inner.dir.display(), error = %e, "Cache cleanup skipped");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().to_string();
            if protected.contains(&name) || protected_parts.contains(&name) {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(true) {
                continue;
            }

            match self.evict_unless_in_flight(&entry.path(), &name) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(file = %name, error = %e, "Failed to evict cached file"),
            }
        }

        if removed > 0 {
            tracing::debug!(removed = removed, kept = keep_keys.len(), "Cache cleaned");
        }
        removed
    }
}

impl TrackCache {
    /// Unlink a cache file unless a download for it is registered
    ///
    /// The in-flight lock is held across the check and the unlink, so no
    /// download can register in between.
    fn evict_unless_in_flight(&self, path: &Path, name: &str) -> std::io::Result<bool> {
        let in_flight = self.lock_in_flight();
        let busy = in_flight.keys().any(|key| {
            let file = Self::file_name(key);
            name == file || name.strip_suffix(PART_SUFFIX) == Some(file.as_str())
        });
        if busy {
            return Ok(false);
        }

        std::fs::remove_file(path)?;
        Ok(true)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(PART_SUFFIX);
    PathBuf::from(name)
}

/// A cached file is usable when it is a non-empty regular file
async fn is_ready(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Refresh the last-used marker
async fn touch(path: &Path) {
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        std::fs::File::options()
            .write(true)
            .open(&path)
            .and_then(|f| f.set_modified(SystemTime::now()))
    })
    .await;

    if let Ok(Err(e)) = result {
        tracing::debug!(error = %e, "Failed to refresh cache mtime");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalObjectStore, ObjectStore};

    async fn setup() -> (tempfile::TempDir, TrackCache) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalObjectStore::new(dir.path().join("buckets")).unwrap());
        for (key, body) in [("music/a.mp3", "aaaa"), ("music/b.mp3", "bb"), ("music/empty.mp3", "")] {
            store
                .put(
                    "prod",
                    key,
                    Box::new(std::io::Cursor::new(body.as_bytes().to_vec())),
                    "audio/mpeg",
                    "",
                )
                .await
                .unwrap();
        }
        let client = StorageClient::new(store, "prod", "stream");
        let cache = TrackCache::new(client, dir.path().join("cache")).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_file_name_is_deterministic() {
        let a = TrackCache::file_name("music/artist/song.mp3");
        let b = TrackCache::file_name("music/artist/song.mp3");
        let c = TrackCache::file_name("music/other/song.mp3");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.ends_with(".mp3"));
        assert_eq!(a.len(), 64 + 4);
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (_dir, cache) = setup().await;

        assert!(!cache.is_cached("music/a.mp3").await);
        let path = cache.get_local_path("music/a.mp3").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "aaaa");
        assert!(cache.is_cached("music/a.mp3").await);
        assert_eq!(cache.in_flight(), 0);

        let again = cache.get_local_path("music/a.mp3").await.unwrap();
        assert_eq!(path, again);
    }

    #[tokio::test]
    async fn test_missing_and_empty_objects_fail() {
        let (_dir, cache) = setup().await;

        let err = cache.get_local_path("music/nope.mp3").await.unwrap_err();
        assert!(matches!(err, CacheError::Download { .. }));

        let err = cache.get_local_path("music/empty.mp3").await.unwrap_err();
        assert!(matches!(err, CacheError::NotFound { .. }));
        assert!(!cache.is_cached("music/empty.mp3").await);
        assert_eq!(std::fs::read_dir(cache.dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_only_requested_keys() {
        let (_dir, cache) = setup().await;

        cache.get_local_path("music/a.mp3").await.unwrap();
        cache.get_local_path("music/b.mp3").await.unwrap();

        let removed = cache.cleanup(&["music/b.mp3".to_string()]).await;
        assert_eq!(removed, 1);
        assert!(!cache.is_cached("music/a.mp3").await);
        assert!(cache.is_cached("music/b.mp3").await);
    }

    #[tokio::test]
    async fn test_cleanup_spares_downloads_registered_late() {
        let (_dir, cache) = setup().await;
        cache.get_local_path("music/a.mp3").await.unwrap();

        // a transfer that started after the caller chose what to keep
        let part = part_path(&cache.path_for("music/b.mp3"));
        std::fs::write(&part, b"b").unwrap();
        let (_tx, rx) = watch::channel(None);
        cache.lock_in_flight().insert("music/b.mp3".to_string(), rx);

        let removed = cache.cleanup(&[]).await;
        assert_eq!(removed, 1);
        assert!(part.exists());
        assert!(!cache.is_cached("music/a.mp3").await);

        cache.lock_in_flight().clear();
        assert_eq!(cache.cleanup(&[]).await, 1);
        assert!(!part.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cleanup_concurrent_with_downloads() {
        let (_dir, cache) = setup().await;

        for _ in 0..25 {
            let downloads: Vec<_> = ["music/a.mp3", "music/b.mp3"]
                .into_iter()
                .map(|key| {
                    let cache = cache.clone();
                    tokio::spawn(async move { cache.get_local_path(key).await })
                })
                .collect();
            let sweeper = {
                let cache = cache.clone();
                tokio::spawn(async move {
                    for _ in 0..5 {
                        cache.cleanup(&[]).await;
                        tokio::task::yield_now().await;
                    }
                })
            };

            for download in downloads {
                let result = download.await.unwrap();
                assert!(result.is_ok(), "download failed: {:?}", result.err());
            }
            sweeper.await.unwrap();
            cache.cleanup(&[]).await;
        }
    }

    #[tokio::test]
    async fn test_prefetch_downloads_in_background() {
        let (_dir, cache) = setup().await;

        let handles = cache.prefetch(vec!["music/a.mp3".into(), "music/b.mp3".into()]);
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(cache.is_cached("music/a.mp3").await);
        assert!(cache.is_cached("music/b.mp3").await);
    }

    #[tokio::test]
    async fn test_hit_refreshes_mtime() {
        let (_dir, cache) = setup().await;
        let path = cache.get_local_path("music/a.mp3").await.unwrap();

        let old = SystemTime::now() - std::time::Duration::from_secs(3600);
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(old)
            .unwrap();

        cache.get_local_path("music/a.mp3").await.unwrap();
        let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert!(modified > old + std::time::Duration::from_secs(1800));
    }
}
