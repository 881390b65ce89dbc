//! Bucket-addressed object storage
//!
//! The playout engine reads audio from the library bucket and writes stream
//! artifacts to the distribution bucket. [`ObjectStore`] is the provider
//! seam; [`LocalObjectStore`] simulates buckets as directories under a root
//! and [`S3ObjectStore`](super::S3ObjectStore) talks to an S3-compatible
//! endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! use onair::storage::{LocalObjectStore, StorageClient};
//!
//! let store = Arc::new(LocalObjectStore::new("data/buckets")?);
//! let client = StorageClient::new(store, "prod", "stream");
//!
//! let reader = client.download("music/artist/track.mp3").await?;
//! client.publish("now_playing.json", body, "application/json", "max-age=0, no-cache").await?;
//! ```

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWriteExt};

/// Streaming body of an object
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Listing entry
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Storage backend abstraction
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List objects whose key starts with `prefix`
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Open an object for streaming
    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader>;

    /// Store an object
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectReader,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()>;

    /// Remove an object
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Whether any object exists under `prefix`
    async fn exists(&self, bucket: &str, prefix: &str) -> Result<bool>;
}

// ============================================================================
// Local Provider
// ============================================================================

/// Filesystem-backed object store
///
/// Each bucket is a directory under the root; keys map to relative paths.
/// Content type and cache control are accepted but not persisted.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `root`, creating the directory
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage root: {}", root.display()))?;
        Ok(Self { root })
    }

    /// Resolve a bucket/key pair to a path below the root
    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if bucket.is_empty() || bucket.contains(['/', '\\']) || escapes {
            anyhow::bail!("invalid object location {bucket}/{key}");
        }

        Ok(self.root.join(bucket).join(relative))
    }

    fn walk(dir: &Path, base: &Path, prefix: &str, out: &mut Vec<ObjectInfo>) -> Result<()> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e).with_context(|| format!("Failed to list {}", dir.display())),
        };

        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            let path = entry.path();

            if meta.is_dir() {
                Self::walk(&path, base, prefix, out)?;
                continue;
            }

            let Ok(rel) = path.strip_prefix(base) else {
                continue;
            };
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if key.starts_with(prefix) {
                out.push(ObjectInfo {
                    key,
                    size: meta.len(),
                    last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                });
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let base = self.object_path(bucket, "")?;
        let prefix = prefix.to_string();

        let mut objects = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            Self::walk(&base, &base, &prefix, &mut out).map(|_| out)
        })
        .await
        .context("listing task failed")??;

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        let path = self.object_path(bucket, key)?;
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("Failed to open object {bucket}/{key}"))?;
        Ok(Box::new(file))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        mut body: ObjectReader,
        _content_type: &str,
        _cache_control: &str,
    ) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Readers of the bucket never see a half-written object
        let mut part = path.clone().into_os_string();
        part.push(".part");
        let part = PathBuf::from(part);

        let mut file = tokio::fs::File::create(&part)
            .await
            .with_context(|| format!("Failed to create {}", part.display()))?;
        tokio::io::copy(&mut body, &mut file)
            .await
            .with_context(|| format!("Failed to write object {bucket}/{key}"))?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&part, &path).await?;
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::remove_file(&path)
            .await
            .with_context(|| format!("Failed to delete object {bucket}/{key}"))?;
        Ok(())
    }

    async fn exists(&self, bucket: &str, prefix: &str) -> Result<bool> {
        Ok(!self.list(bucket, prefix).await?.is_empty())
    }
}

// ============================================================================
// Storage Client
// ============================================================================

/// Routes library reads and stream writes to their buckets
#[derive(Clone)]
pub struct StorageClient {
    store: Arc<dyn ObjectStore>,
    bucket_prod: String,
    bucket_stream: String,
}

impl StorageClient {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket_prod: impl Into<String>,
        bucket_stream: impl Into<String>,
    ) -> Self {
        Self {
            store,
            bucket_prod: bucket_prod.into(),
            bucket_stream: bucket_stream.into(),
        }
    }

    /// Open a library object
    pub async fn download(&self, key: &str) -> Result<ObjectReader> {
        self.store.get(&self.bucket_prod, key).await
    }

    /// List library objects under a prefix
    pub async fn list_library(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        self.store.list(&self.bucket_prod, prefix).await
    }

    /// Whether the library holds anything under a prefix
    pub async fn library_has(&self, prefix: &str) -> Result<bool> {
        self.store.exists(&self.bucket_prod, prefix).await
    }

    /// Publish an object to the distribution bucket
    pub async fn publish(
        &self,
        key: &str,
        body: ObjectReader,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        self.store
            .put(&self.bucket_stream, key, body, content_type, cache_control)
            .await
    }

    /// Publish an in-memory document to the distribution bucket
    pub async fn publish_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        self.publish(
            key,
            Box::new(std::io::Cursor::new(bytes)),
            content_type,
            cache_control,
        )
        .await
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub fn stream_bucket(&self) -> &str {
        &self.bucket_stream
    }
}
