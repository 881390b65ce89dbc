//! Segment uploader
//!
//! Polls the encoder's output directory and ships finished artifacts to the
//! stream bucket. A file counts as finished once its modification time is
//! older than the debounce window.
//!
//! - The manifest is re-uploaded whenever its modification time advances.
//! - Each `.ts` segment is uploaded once, recorded as the latest sequence,
//!   then deleted locally.
//!
//! Segments finalized within the same tick may upload in either order; the
//! manifest decides playback order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use regex::Regex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::UploaderConfig;
use crate::metrics;
use crate::state::StateManager;
use crate::storage::StorageClient;

static SEQUENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_(\d+)\.ts$").expect("segment sequence pattern"));

const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
const MANIFEST_CACHE_CONTROL: &str = "max-age=0, no-cache, no-store, must-revalidate";
const SEGMENT_CONTENT_TYPE: &str = "video/MP2T";
const SEGMENT_CACHE_CONTROL: &str = "public, max-age=86400";

/// Trailing segment index of a file name, e.g. `stream_17_042.ts` -> 42
pub fn segment_sequence(file_name: &str) -> Option<u64> {
    SEQUENCE_REGEX
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Outcome of one directory scan
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScanReport {
    pub manifest_uploaded: bool,
    pub segments_uploaded: Vec<String>,
    pub failures: usize,
}

/// Timer-driven shipper of encoder output
pub struct SegmentUploader {
    storage: StorageClient,
    state: StateManager,
    dir: PathBuf,
    manifest_name: String,
    poll_interval: Duration,
    debounce: Duration,
    purge_threshold: usize,
    last_manifest: Option<SystemTime>,
    uploaded: HashSet<String>,
}

impl SegmentUploader {
    pub fn new(
        storage: StorageClient,
        state: StateManager,
        dir: impl Into<PathBuf>,
        config: &UploaderConfig,
    ) -> Self {
        Self {
            storage,
            state,
            dir: dir.into(),
            manifest_name: config.manifest_name.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            debounce: Duration::from_millis(config.debounce_ms),
            purge_threshold: config.purge_threshold,
            last_manifest: None,
            uploaded: HashSet::new(),
        }
    }

    /// Number of segment names remembered as uploaded
    pub fn tracked(&self) -> usize {
        self.uploaded.len()
    }

    /// Poll until `shutdown` flips to true
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(dir = %self.dir.display(), "Uploader started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        tracing::warn!(dir = %self.dir.display(), error = %e, "Uploader scan failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Uploader stopped");
    }

    /// Upload everything that has settled since the last scan
    pub async fn scan_once(&mut self) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to read {}", self.dir.display()))?;

        let now = SystemTime::now();
        let mut segments: Vec<(u64, String, PathBuf)> = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else {
                continue;
            };

            // Still being written
            match now.duration_since(modified) {
                Ok(age) if age >= self.debounce => {}
                _ => continue,
            }

            if name == self.manifest_name {
                if self.last_manifest.map_or(true, |seen| modified > seen) {
                    match self.upload_manifest(&entry.path()).await {
                        Ok(()) => {
                            tracing::debug!(file = %name, "Manifest uploaded");
                            self.last_manifest = Some(modified);
                            report.manifest_uploaded = true;
                        }
                        Err(e) => {
                            tracing::warn!(file = %name, error = %e, "Manifest upload failed");
                            report.failures += 1;
                        }
                    }
                }
                continue;
            }

            if name.ends_with(".ts") && !self.uploaded.contains(&name) {
                let sequence = segment_sequence(&name).unwrap_or(0);
                segments.push((sequence, name, entry.path()));
            }
        }

        segments.sort();
        for (sequence, name, path) in segments {
            if segment_sequence(&name).is_some() {
                self.record_sequence(sequence).await;
            }

            match self.upload_segment(&path, &name).await {
                Ok(()) => {
                    tracing::debug!(file = %name, sequence, "Segment uploaded");
                    self.uploaded.insert(name.clone());
                    if let Err(e) = tokio::fs::remove_file(&path).await {
                        tracing::warn!(file = %name, error = %e, "Failed to remove uploaded segment");
                    }
                    report.segments_uploaded.push(name);
                }
                Err(e) => {
                    tracing::warn!(file = %name, error = %e, "Segment upload failed");
                    report.failures += 1;
                }
            }
        }

        if self.uploaded.len() > self.purge_threshold {
            self.purge().await;
        }

        Ok(report)
    }

    async fn record_sequence(&self, sequence: u64) {
        let state = self.state.clone();
        let result = tokio::task::spawn_blocking(move || state.increment_sequence(sequence)).await;
        match result {
            Ok(Ok(())) => metrics::set_hls_sequence(sequence),
            Ok(Err(e)) => tracing::warn!(sequence, error = %e, "Failed to persist sequence"),
            Err(e) => tracing::warn!(sequence, error = %e, "Sequence update task failed"),
        }
    }

    async fn upload_manifest(&self, path: &Path) -> Result<()> {
        self.upload(path, &self.manifest_name, "playlist", MANIFEST_CONTENT_TYPE, MANIFEST_CACHE_CONTROL)
            .await
    }

    async fn upload_segment(&self, path: &Path, name: &str) -> Result<()> {
        self.upload(path, name, "segment", SEGMENT_CONTENT_TYPE, SEGMENT_CACHE_CONTROL)
            .await
    }

    async fn upload(
        &self,
        path: &Path,
        key: &str,
        kind: &str,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        let timer = metrics::start_upload_timer(kind);
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;

        match self
            .storage
            .publish(key, Box::new(file), content_type, cache_control)
            .await
        {
            Ok(()) => {
                drop(timer);
                metrics::record_upload(kind);
                Ok(())
            }
            Err(e) => {
                timer.discard();
                Err(e)
            }
        }
    }

    /// Forget uploaded names whose local file is gone
    async fn purge(&mut self) {
        let before = self.uploaded.len();
        let mut keep = HashSet::new();
        for name in self.uploaded.drain() {
            if tokio::fs::try_exists(self.dir.join(&name)).await.unwrap_or(false) {
                keep.insert(name);
            }
        }
        self.uploaded = keep;

        let purged = before - self.uploaded.len();
        if purged > 0 {
            tracing::debug!(purged, "Uploader tracking set purged");
        }
    }
}
