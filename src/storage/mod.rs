//! Persistence for the playout engine
//!
//! This module handles the station database (tracks, play history,
//! schedules and the stream state record) and the object store that holds
//! audio files and receives stream segments.
//!
//! # Modules
//!
//! - [`repository`] - Track and schedule repositories over SQLite
//! - [`object_store`] - Bucket-addressed blob storage
//! - [`s3`] - S3-compatible backend for the object store

pub mod object_store;
pub mod repository;
pub mod s3;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub use object_store::{LocalObjectStore, ObjectInfo, ObjectReader, ObjectStore, StorageClient};
pub use repository::{
    SqliteScheduleRepository, SqliteTrackRepository, TrackOrder, TrackQuery, TrackRepository,
};
pub use s3::{S3ObjectStore, SigV4Signer};

use crate::config::StorageConfig;

/// Build the object store selected by `storage.provider`
pub fn open_object_store(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalObjectStore::new(&config.root)?)),
        "s3" => Ok(Arc::new(S3ObjectStore::from_config(config)?)),
        other => Err(anyhow!("unsupported storage provider '{other}'")),
    }
}

/// Shared handle to the station database
///
/// Clones share the same connection; every repository serializes its
/// statements through the inner mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create database directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        create_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the connection for a unit of work
    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }
}

/// Create tables and indexes if they do not exist
fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL DEFAULT '',
            artist TEXT NOT NULL DEFAULT '',
            album TEXT NOT NULL DEFAULT '',
            genre TEXT NOT NULL DEFAULT '',
            style TEXT NOT NULL DEFAULT '',
            year INTEGER,
            duration REAL NOT NULL DEFAULT 0,
            bpm REAL NOT NULL DEFAULT 0,
            musical_key TEXT NOT NULL DEFAULT '',
            scale TEXT NOT NULL DEFAULT '',
            danceability REAL NOT NULL DEFAULT 0,
            loudness REAL NOT NULL DEFAULT 0,
            play_count INTEGER NOT NULL DEFAULT 0,
            last_played TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_tracks_rotation ON tracks(play_count, last_played);

        CREATE TABLE IF NOT EXISTS play_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            track_id INTEGER NOT NULL REFERENCES tracks(id),
            played_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_play_history_played_at ON play_history(played_at);

        CREATE TABLE IF NOT EXISTS rulesets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            mode TEXT NOT NULL DEFAULT '',
            genre TEXT,
            styles TEXT NOT NULL DEFAULT '',
            min_bpm REAL,
            max_bpm REAL,
            min_year INTEGER,
            max_year INTEGER
        );

        CREATE TABLE IF NOT EXISTS playlists (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS playlist_tracks (
            playlist_id INTEGER NOT NULL REFERENCES playlists(id),
            position INTEGER NOT NULL,
            track_key TEXT NOT NULL,
            PRIMARY KEY (playlist_id, position)
        );

        CREATE TABLE IF NOT EXISTS schedules (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            days TEXT NOT NULL DEFAULT '',
            date TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            ruleset_id INTEGER REFERENCES rulesets(id),
            playlist_id INTEGER REFERENCES playlists(id)
        );

        CREATE TABLE IF NOT EXISTS stream_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            track_id INTEGER,
            hls_sequence INTEGER NOT NULL DEFAULT 0,
            started_at TEXT,
            updated_at TEXT
        );
        "#,
    )
    .context("Failed to create schema")?;

    Ok(())
}

/// Format a timestamp for storage
///
/// Fixed-width UTC RFC 3339 so that string comparison in SQL follows
/// chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
