//! Repository Pattern for the station database
//!
//! Selection logic talks to [`TrackRepository`]; the scheduler talks to a
//! [`ScheduleSource`]. Both are implemented over SQLite here and can be
//! swapped for mocks in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Selectors / Scheduler / Engine                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │        TrackRepository            ScheduleSource            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │    SqliteTrackRepository      SqliteScheduleRepository      │
//! │                 (shared Database handle)                    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - Every [`TrackQuery`] carries a namespace prefix; no read crosses it.
//! - `play_count` and `last_played` are only written by
//!   [`TrackRepository::record_play`].

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database};
use crate::models::{
    format_days, parse_days, PlayHistory, Playlist, Program, RuleSet, ScheduleSlot, Track,
};
use crate::scheduler::{ScheduleSource, SchedulerError, SchedulerResult};

// ============================================================================
// Track Queries
// ============================================================================

/// Result ordering for track queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackOrder {
    /// Least played first, never-played before oldest-played
    #[default]
    Starved,
    /// Uniformly random
    Random,
}

impl TrackOrder {
    fn as_sql(&self) -> &'static str {
        match self {
            Self::Starved => "play_count ASC, last_played ASC NULLS FIRST, id ASC",
            Self::Random => "RANDOM()",
        }
    }
}

/// Filtered, ordered, limited track read
///
/// The namespace prefix is mandatory; everything else is optional.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackQuery {
    pub prefix: String,
    pub genre: Option<String>,
    /// Matched as substrings of style or genre, any one suffices
    pub styles: Vec<String>,
    pub min_bpm: Option<f64>,
    pub max_bpm: Option<f64>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
    /// Only tracks never played or last played before this instant
    pub played_before: Option<DateTime<Utc>>,
    pub exclude_artists: Vec<String>,
    pub exclude_ids: Vec<i64>,
    pub order: TrackOrder,
    pub limit: usize,
}

impl TrackQuery {
    /// Unfiltered query over a namespace
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            genre: None,
            styles: Vec::new(),
            min_bpm: None,
            max_bpm: None,
            min_year: None,
            max_year: None,
            played_before: None,
            exclude_artists: Vec::new(),
            exclude_ids: Vec::new(),
            order: TrackOrder::Starved,
            limit: 100,
        }
    }

    /// Apply the constraint filters of a rule set
    pub fn with_rules(mut self, rules: &RuleSet) -> Self {
        self.genre = rules.genre.clone().filter(|g| !g.trim().is_empty());
        self.styles = rules.styles.clone();
        self.min_bpm = rules.min_bpm;
        self.max_bpm = rules.max_bpm;
        self.min_year = rules.min_year;
        self.max_year = rules.max_year;
        self
    }

    /// Drop style, BPM and year filters, keeping genre and namespace
    pub fn without_attribute_filters(mut self) -> Self {
        self.styles.clear();
        self.min_bpm = None;
        self.max_bpm = None;
        self.min_year = None;
        self.max_year = None;
        self
    }

    /// Drop the genre filter
    pub fn without_genre(mut self) -> Self {
        self.genre = None;
        self
    }

    pub fn played_before(mut self, cutoff: DateTime<Utc>) -> Self {
        self.played_before = Some(cutoff);
        self
    }

    pub fn excluding_artists(mut self, artists: Vec<String>) -> Self {
        self.exclude_artists = artists;
        self
    }

    pub fn excluding_ids(mut self, ids: Vec<i64>) -> Self {
        self.exclude_ids = ids;
        self
    }

    pub fn order(mut self, order: TrackOrder) -> Self {
        self.order = order;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Render the WHERE clause and its bound values
    fn to_sql(&self) -> (String, Vec<Value>) {
        let mut clauses = vec!["substr(key, 1, length(?)) = ?".to_string()];
        let mut values = vec![
            Value::Text(self.prefix.clone()),
            Value::Text(self.prefix.clone()),
        ];

        if let Some(genre) = &self.genre {
            clauses.push("genre = ? COLLATE NOCASE".to_string());
            values.push(Value::Text(genre.clone()));
        }

        let styles: Vec<&String> = self.styles.iter().filter(|s| !s.is_empty()).collect();
        if !styles.is_empty() {
            let group = styles
                .iter()
                .map(|_| "(instr(lower(style), lower(?)) > 0 OR instr(lower(genre), lower(?)) > 0)")
                .collect::<Vec<_>>()
                .join(" OR ");
            clauses.push(format!("({group})"));
            for style in styles {
                values.push(Value::Text(style.clone()));
                values.push(Value::Text(style.clone()));
            }
        }

        if let Some(min) = self.min_bpm {
            clauses.push("bpm >= ?".to_string());
            values.push(Value::Real(min));
        }
        if let Some(max) = self.max_bpm {
            clauses.push("bpm <= ?".to_string());
            values.push(Value::Real(max));
        }
        if let Some(min) = self.min_year {
            clauses.push("year >= ?".to_string());
            values.push(Value::Integer(min as i64));
        }
        if let Some(max) = self.max_year {
            clauses.push("year <= ?".to_string());
            values.push(Value::Integer(max as i64));
        }

        if let Some(cutoff) = self.played_before {
            clauses.push("(last_played IS NULL OR last_played < ?)".to_string());
            values.push(Value::Text(format_timestamp(cutoff)));
        }

        if !self.exclude_artists.is_empty() {
            let marks = vec!["?"; self.exclude_artists.len()].join(", ");
            clauses.push(format!("artist NOT IN ({marks})"));
            values.extend(self.exclude_artists.iter().cloned().map(Value::Text));
        }

        if !self.exclude_ids.is_empty() {
            let marks = vec!["?"; self.exclude_ids.len()].join(", ");
            clauses.push(format!("id NOT IN ({marks})"));
            values.extend(self.exclude_ids.iter().copied().map(Value::Integer));
        }

        (clauses.join(" AND "), values)
    }
}

// ============================================================================
// Repository Traits
// ============================================================================

/// Repository for track records and play statistics
pub trait TrackRepository: Send + Sync {
    /// Run a filtered track query
    fn find_tracks(&self, query: &TrackQuery) -> Result<Vec<Track>>;

    /// Get track by ID
    fn get_by_id(&self, id: i64) -> Result<Option<Track>>;

    /// Get track by object key
    fn get_by_key(&self, key: &str) -> Result<Option<Track>>;

    /// Artists of the `limit` most recent plays, newest first
    fn recent_artists(&self, limit: usize) -> Result<Vec<String>>;

    /// Most recent play history entries, newest first
    fn recent_history(&self, limit: usize) -> Result<Vec<PlayHistory>>;

    /// Atomically bump play statistics and append a history row
    fn record_play(&self, track_id: i64, played_at: DateTime<Utc>) -> Result<()>;

    /// Insert or update a track by key, returning its ID
    ///
    /// Play statistics of an existing track are left untouched.
    fn upsert_track(&self, track: &Track) -> Result<i64>;

    /// Number of tracks in a namespace
    fn count(&self, prefix: &str) -> Result<usize>;
}

// ============================================================================
// SQLite Track Repository
// ============================================================================

const TRACK_COLUMNS: &str = "id, key, title, artist, album, genre, style, year, duration, bpm, \
     musical_key, scale, danceability, loudness, play_count, last_played";

/// SQLite implementation of [`TrackRepository`]
#[derive(Clone)]
pub struct SqliteTrackRepository {
    db: Database,
}

impl SqliteTrackRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn row_to_track(row: &Row<'_>) -> rusqlite::Result<Track> {
        let last_played: Option<String> = row.get(15)?;
        Ok(Track {
            id: row.get(0)?,
            key: row.get(1)?,
            title: row.get(2)?,
            artist: row.get(3)?,
            album: row.get(4)?,
            genre: row.get(5)?,
            style: row.get(6)?,
            year: row.get(7)?,
            duration: row.get(8)?,
            bpm: row.get(9)?,
            musical_key: row.get(10)?,
            scale: row.get(11)?,
            danceability: row.get(12)?,
            loudness: row.get(13)?,
            play_count: row.get(14)?,
            last_played: last_played.as_deref().and_then(parse_timestamp),
        })
    }
}

impl TrackRepository for SqliteTrackRepository {
    fn find_tracks(&self, query: &TrackQuery) -> Result<Vec<Track>> {
        let (filter, mut values) = query.to_sql();
        let sql = format!(
            "SELECT {TRACK_COLUMNS} FROM tracks WHERE {filter} ORDER BY {} LIMIT ?",
            query.order.as_sql()
        );
        values.push(Value::Integer(query.limit as i64));

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&sql).context("Failed to prepare track query")?;
        let tracks = stmt
            .query_map(params_from_iter(values), Self::row_to_track)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read track rows")?;

        Ok(tracks)
    }

    fn get_by_id(&self, id: i64) -> Result<Option<Track>> {
        let conn = self.db.lock()?;
        let track = conn
            .query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"),
                params![id],
                Self::row_to_track,
            )
            .optional()
            .context("Failed to get track by id")?;

        Ok(track)
    }

    fn get_by_key(&self, key: &str) -> Result<Option<Track>> {
        let conn = self.db.lock()?;
        let track = conn
            .query_row(
                &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE key = ?1"),
                params![key],
                Self::row_to_track,
            )
            .optional()
            .context("Failed to get track by key")?;

        Ok(track)
    }

    fn recent_artists(&self, limit: usize) -> Result<Vec<String>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT t.artist FROM play_history h
             JOIN tracks t ON t.id = h.track_id
             ORDER BY h.played_at DESC, h.id DESC
             LIMIT ?1",
        )?;

        let mut artists: Vec<String> = Vec::new();
        for artist in stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))? {
            let artist = artist?;
            if !artist.is_empty() && !artists.contains(&artist) {
                artists.push(artist);
            }
        }

        Ok(artists)
    }

    fn recent_history(&self, limit: usize) -> Result<Vec<PlayHistory>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, track_id, played_at FROM play_history
             ORDER BY played_at DESC, id DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, track_id, played_at)| {
                parse_timestamp(&played_at).map(|played_at| PlayHistory {
                    id,
                    track_id,
                    played_at,
                })
            })
            .collect())
    }

    fn record_play(&self, track_id: i64, played_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.db.lock()?;
        let ts = format_timestamp(played_at);

        let tx = conn.transaction()?;
        let updated = tx
            .execute(
                "UPDATE tracks SET play_count = play_count + 1, last_played = ?1 WHERE id = ?2",
                params![ts, track_id],
            )
            .context("Failed to update play statistics")?;

        if updated == 0 {
            anyhow::bail!("track {track_id} not found");
        }

        tx.execute(
            "INSERT INTO play_history (track_id, played_at) VALUES (?1, ?2)",
            params![track_id, ts],
        )
        .context("Failed to append play history")?;
        tx.commit()?;

        Ok(())
    }

    fn upsert_track(&self, track: &Track) -> Result<i64> {
        let conn = self.db.lock()?;
        conn.execute(
            r#"
            INSERT INTO tracks (key, title, artist, album, genre, style, year, duration, bpm,
                                musical_key, scale, danceability, loudness)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            ON CONFLICT(key) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                album = excluded.album,
                genre = excluded.genre,
                style = excluded.style,
                year = excluded.year,
                duration = excluded.duration,
                bpm = excluded.bpm,
                musical_key = excluded.musical_key,
                scale = excluded.scale,
                danceability = excluded.danceability,
                loudness = excluded.loudness
            "#,
            params![
                track.key,
                track.title,
                track.artist,
                track.album,
                track.genre,
                track.style,
                track.year,
                track.duration,
                track.bpm,
                track.musical_key,
                track.scale,
                track.danceability,
                track.loudness,
            ],
        )
        .context("Failed to upsert track")?;

        let id = conn.query_row(
            "SELECT id FROM tracks WHERE key = ?1",
            params![track.key],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    fn count(&self, prefix: &str) -> Result<usize> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tracks WHERE substr(key, 1, length(?1)) = ?1",
            params![prefix],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }
}

// ============================================================================
// SQLite Schedule Repository
// ============================================================================

/// SQLite-backed calendar of slots
///
/// Schedules own an optional rule set and an optional playlist by ID; the
/// rule set never refers back to the schedules using it.
#[derive(Clone)]
pub struct SqliteScheduleRepository {
    db: Database,
}

impl SqliteScheduleRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a slot together with its rule set or playlist
    pub fn insert_slot(&self, slot: &ScheduleSlot) -> Result<i64> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        let (ruleset_id, playlist_id) = match &slot.program {
            Program::Rules(rules) => {
                tx.execute(
                    "INSERT INTO rulesets (name, mode, genre, styles, min_bpm, max_bpm, min_year, max_year)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        rules.name,
                        rules.mode,
                        rules.genre,
                        rules.styles.join(","),
                        rules.min_bpm,
                        rules.max_bpm,
                        rules.min_year,
                        rules.max_year,
                    ],
                )?;
                (Some(tx.last_insert_rowid()), None)
            }
            Program::Playlist(playlist) => {
                tx.execute(
                    "INSERT INTO playlists (name) VALUES (?1)",
                    params![playlist.name],
                )?;
                let playlist_id = tx.last_insert_rowid();
                for (position, key) in playlist.track_keys.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO playlist_tracks (playlist_id, position, track_key) VALUES (?1, ?2, ?3)",
                        params![playlist_id, position as i64, key],
                    )?;
                }
                (None, Some(playlist_id))
            }
        };

        tx.execute(
            "INSERT INTO schedules (name, is_active, days, date, start_time, end_time, ruleset_id, playlist_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                slot.name,
                slot.is_active,
                format_days(&slot.days),
                slot.date.map(|d| d.format("%Y-%m-%d").to_string()),
                slot.start,
                slot.end,
                ruleset_id,
                playlist_id,
            ],
        )
        .context("Failed to insert schedule")?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(id)
    }

    fn load_slots(&self) -> Result<Vec<ScheduleSlot>> {
        let conn = self.db.lock()?;

        let mut stmt = conn.prepare(
            "SELECT s.id, s.name, s.is_active, s.days, s.date, s.start_time, s.end_time,
                    s.playlist_id,
                    r.id, r.name, r.mode, r.genre, r.styles, r.min_bpm, r.max_bpm, r.min_year, r.max_year
             FROM schedules s
             LEFT JOIN rulesets r ON r.id = s.ruleset_id
             ORDER BY s.id",
        )?;

        let rows = stmt
            .query_map([], |row| {
                let date: Option<String> = row.get(4)?;
                let ruleset_id: Option<i64> = row.get(8)?;
                let rules = match ruleset_id {
                    Some(id) => RuleSet {
                        id: Some(id),
                        name: row.get(9)?,
                        mode: row.get(10)?,
                        genre: row.get(11)?,
                        styles: RuleSet::parse_styles(&row.get::<_, String>(12)?),
                        min_bpm: row.get(13)?,
                        max_bpm: row.get(14)?,
                        min_year: row.get(15)?,
                        max_year: row.get(16)?,
                    },
                    None => RuleSet::unrestricted(),
                };

                Ok((
                    ScheduleSlot {
                        id: Some(row.get(0)?),
                        name: row.get(1)?,
                        is_active: row.get(2)?,
                        days: parse_days(&row.get::<_, String>(3)?),
                        date: date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
                        start: row.get(5)?,
                        end: row.get(6)?,
                        program: Program::Rules(rules),
                    },
                    row.get::<_, Option<i64>>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut slots = Vec::with_capacity(rows.len());
        for (mut slot, playlist_id) in rows {
            if let Some(playlist_id) = playlist_id {
                let name: String = conn.query_row(
                    "SELECT name FROM playlists WHERE id = ?1",
                    params![playlist_id],
                    |row| row.get(0),
                )?;
                let mut keys_stmt = conn.prepare(
                    "SELECT track_key FROM playlist_tracks WHERE playlist_id = ?1 ORDER BY position",
                )?;
                let track_keys = keys_stmt
                    .query_map(params![playlist_id], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;

                slot.program = Program::Playlist(Playlist {
                    id: Some(playlist_id),
                    name,
                    track_keys,
                });
            }
            slots.push(slot);
        }

        Ok(slots)
    }
}

impl ScheduleSource for SqliteScheduleRepository {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn slots(&self) -> SchedulerResult<Vec<ScheduleSlot>> {
        self.load_slots()
            .map_err(|e| SchedulerError::source_unavailable("sqlite", format!("{e:#}")))
    }
}
