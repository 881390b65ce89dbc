//! Integration tests for the playout pipeline
//!
//! These tests verify the producer and consumer halves end to end:
//! - A track is cached, streamed, recorded and announced
//! - Concurrent cache misses share one transfer
//! - Uploaded segment indices drive the resume decision
//! - An encoder exit ends the run with a recoverable error
//! - A missing encoder binary is a configuration error

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use common::{track, write_file, TestStation};
use onair::cache::TrackCache;
use onair::config::UploaderConfig;
use onair::error::{Error, OnAirErrorTrait};
use onair::scheduler::Clock;
use onair::state::{ResumePlan, StateManager};
use onair::storage::{
    LocalObjectStore, ObjectInfo, ObjectReader, ObjectStore, StorageClient, TrackRepository,
};
use onair::streaming::{Engine, PlayoutCursor, SegmentUploader, TrackKind, NOW_PLAYING_KEY};

fn engine(station: &TestStation, config: onair::config::Config) -> Engine {
    let cache = TrackCache::new(station.storage.clone(), &config.radio.cache_dir).unwrap();
    let state = StateManager::new(station.db.clone(), station.clock.clone()).unwrap();
    Engine::new(
        config,
        station.scheduler(),
        station.repo.clone(),
        cache,
        state,
        station.storage.clone(),
    )
}

// ============================================================================
// Producer
// ============================================================================

#[tokio::test]
async fn test_track_is_streamed_recorded_and_announced() {
    let station = TestStation::new();
    let body = b"ID3-fake-mp3-payload".repeat(64);
    let id = station.add_audio(track("music/a.mp3", "Artist A"), &body);

    let engine = engine(&station, station.config());
    let mut sink: Vec<u8> = Vec::new();
    let played = engine
        .play_one(&mut sink, &mut PlayoutCursor::new())
        .await
        .unwrap();

    assert_eq!(played.selection.kind, TrackKind::Music);
    assert_eq!(played.bytes, Some(body.len() as u64));
    assert_eq!(sink, body);

    played.recorded.unwrap().await.unwrap();
    let aired = station.repo.get_by_id(id).unwrap().unwrap();
    assert_eq!(aired.play_count, 1);
    assert_eq!(aired.last_played, Some(station.clock.now()));
    assert_eq!(station.repo.recent_history(10).unwrap().len(), 1);

    let state = StateManager::new(station.db.clone(), station.clock.clone()).unwrap();
    assert_eq!(state.get_current_state().unwrap().track_id, Some(id));

    // Beacon publication runs in the background
    let beacon = station.bucket_path("stream").join(NOW_PLAYING_KEY);
    for _ in 0..50 {
        if beacon.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&beacon).unwrap()).unwrap();
    assert_eq!(json["artist"], "Artist A");
    assert_eq!(json["show"], "General Rotation");
    assert_eq!(engine.board().current().unwrap().artist, "Artist A");
}

#[tokio::test]
async fn test_consecutive_tracks_rotate_library() {
    let station = TestStation::new();
    for i in 0..4 {
        station.add_audio(
            track(&format!("music/{i}.mp3"), &format!("Artist {i}")),
            format!("track-{i}").as_bytes(),
        );
    }

    let engine = engine(&station, station.config());
    let mut cursor = PlayoutCursor::new();
    let mut sink: Vec<u8> = Vec::new();
    let mut keys = Vec::new();
    for _ in 0..4 {
        let played = engine.play_one(&mut sink, &mut cursor).await.unwrap();
        played.recorded.unwrap().await.unwrap();
        keys.push(played.selection.track.key);
    }

    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 4);
}

// ============================================================================
// Cache
// ============================================================================

/// Local store that counts and slows down reads
struct CountingStore {
    inner: LocalObjectStore,
    gets: AtomicUsize,
}

#[async_trait]
impl ObjectStore for CountingStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        self.inner.list(bucket, prefix).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<ObjectReader> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.inner.get(bucket, key).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectReader,
        content_type: &str,
        cache_control: &str,
    ) -> Result<()> {
        self.inner.put(bucket, key, body, content_type, cache_control).await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.inner.delete(bucket, key).await
    }

    async fn exists(&self, bucket: &str, prefix: &str) -> Result<bool> {
        self.inner.exists(bucket, prefix).await
    }
}

#[tokio::test]
async fn test_concurrent_misses_share_one_download() {
    let station = TestStation::new();
    write_file(&station.bucket_path("prod").join("music/big.mp3"), b"payload");

    let store = Arc::new(CountingStore {
        inner: LocalObjectStore::new(station.root.path().join("buckets")).unwrap(),
        gets: AtomicUsize::new(0),
    });
    let storage = StorageClient::new(store.clone(), "prod", "stream");
    let cache = TrackCache::new(storage, station.root.path().join("cache")).unwrap();

    let requests = (0..8).map(|_| {
        let cache = cache.clone();
        tokio::spawn(async move { cache.get_local_path("music/big.mp3").await })
    });
    let paths: Vec<_> = futures::future::join_all(requests)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(store.gets.load(Ordering::SeqCst), 1);
    assert!(paths.iter().all(|p| *p == paths[0]));
    assert_eq!(std::fs::read(&paths[0]).unwrap(), b"payload");
    assert_eq!(cache.in_flight(), 0);
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_uploaded_segments_drive_warm_resume() {
    let station = TestStation::new();
    let id = station.add_track(track("music/a.mp3", "A"));
    let state = StateManager::new(station.db.clone(), station.clock.clone()).unwrap();
    state.update_track(id, 0).unwrap();

    let segment_dir = station.root.path().join("hls");
    write_file(&segment_dir.join("stream_1741348800_010.ts"), b"seg");
    write_file(&segment_dir.join("stream_1741348800_011.ts"), b"seg");

    let config = UploaderConfig {
        debounce_ms: 0,
        ..Default::default()
    };
    let mut uploader =
        SegmentUploader::new(station.storage.clone(), state.clone(), &segment_dir, &config);
    let report = uploader.scan_once().await.unwrap();
    assert_eq!(report.segments_uploaded.len(), 2);
    assert!(station
        .bucket_path("stream")
        .join("stream_1741348800_011.ts")
        .exists());

    station.clock.advance(chrono::Duration::minutes(3));
    let plan = state.plan_resume(chrono::Duration::minutes(10), 2).unwrap();
    assert_eq!(plan.start_sequence(), 13);
    assert_eq!(plan.resume_track(), Some(id));

    station.clock.advance(chrono::Duration::minutes(8));
    let plan = state.plan_resume(chrono::Duration::minutes(10), 2).unwrap();
    assert_eq!(plan, ResumePlan::Cold);
}

#[cfg(unix)]
#[tokio::test]
async fn test_encoder_exit_ends_run() {
    let station = TestStation::new();
    let mut config = station.config();
    config.encoder.binary = "false".to_string();
    config.radio.empty_library_retry_secs = 60;

    let stale = config.radio.segment_dir.join("stream_1_000.ts");
    write_file(&stale, b"old run");

    let engine = engine(&station, config.clone());
    let (_tx, shutdown) = tokio::sync::watch::channel(false);
    let err = engine.run(shutdown).await.unwrap_err();

    assert!(matches!(err, Error::Encoder(_)));
    assert!(err.is_recoverable());
    assert!(config.radio.segment_dir.is_dir());
    assert!(!stale.exists());
}

#[tokio::test]
async fn test_missing_encoder_binary_is_fatal() {
    let station = TestStation::new();
    let mut config = station.config();
    config.encoder.binary = station
        .root
        .path()
        .join("no-such-encoder")
        .to_string_lossy()
        .into_owned();

    let engine = engine(&station, config);
    let (_tx, shutdown) = tokio::sync::watch::channel(false);
    let err = engine.run(shutdown).await.unwrap_err();

    assert!(matches!(err, Error::Config(_)), "unexpected error: {err}");
    assert!(!err.is_recoverable());
    assert!(err.to_string().contains("encoder.binary"));
}
