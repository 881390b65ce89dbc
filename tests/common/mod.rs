//! Common test utilities

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use onair::config::Config;
use onair::models::Track;
use onair::scheduler::{FixedClock, Scheduler, Timetable};
use onair::storage::{Database, LocalObjectStore, SqliteTrackRepository, StorageClient, TrackRepository};
use tempfile::TempDir;

/// A throwaway station: database, buckets and a pinned clock
pub struct TestStation {
    pub root: TempDir,
    pub db: Database,
    pub repo: Arc<SqliteTrackRepository>,
    pub clock: Arc<FixedClock>,
    pub storage: StorageClient,
    pub timetable: Arc<Timetable>,
}

impl TestStation {
    /// Friday 2025-03-07 12:00, no timetable slots
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let db = Database::open(root.path().join("onair.db")).unwrap();
        let repo = Arc::new(SqliteTrackRepository::new(db.clone()));
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(LocalObjectStore::new(root.path().join("buckets")).unwrap());
        let storage = StorageClient::new(store, "prod", "stream");

        Self {
            root,
            db,
            repo,
            clock,
            storage,
            timetable: Arc::new(Timetable::new(Vec::new())),
        }
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.timetable.clone(), self.clock.clone())
    }

    /// Configuration pointing every directory into the temp root
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.storage.root = self.root.path().join("buckets");
        config.database.sqlite_path = self.root.path().join("onair.db");
        config.radio.segment_dir = self.root.path().join("hls");
        config.radio.cache_dir = self.root.path().join("cache");
        config
    }

    pub fn bucket_path(&self, bucket: &str) -> PathBuf {
        self.root.path().join("buckets").join(bucket)
    }

    /// Insert a track record
    pub fn add_track(&self, track: Track) -> i64 {
        self.repo.upsert_track(&track).unwrap()
    }

    /// Insert a track record and write its audio object
    pub fn add_audio(&self, track: Track, body: &[u8]) -> i64 {
        write_file(&self.bucket_path("prod").join(&track.key), body);
        self.add_track(track)
    }
}

/// Create a test track with default values
pub fn track(key: &str, artist: &str) -> Track {
    Track {
        key: key.to_string(),
        artist: artist.to_string(),
        title: format!("Title of {key}"),
        duration: 200.0,
        ..Default::default()
    }
}

/// Create a track with genre and tempo
pub fn styled_track(key: &str, artist: &str, genre: &str, bpm: f64) -> Track {
    Track {
        genre: genre.to_string(),
        style: genre.to_string(),
        bpm,
        musical_key: "A".to_string(),
        scale: "minor".to_string(),
        danceability: 0.7,
        ..track(key, artist)
    }
}

pub fn write_file(path: &Path, body: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}
