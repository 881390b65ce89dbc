//! Durable playout state for crash recovery
//!
//! One record with a fixed identity holds the track that last started and
//! the index of the last emitted HLS segment. On restart, [`ResumePlan`]
//! decides from that record whether to continue the live sequence or start
//! a fresh one.
//!
//! ```text
//!  restart ──► updated_at within window? ──yes──► Warm: replay track,
//!                     │                            start at sequence + margin
//!                     no
//!                     ▼
//!                    Cold: sequence 0
//! ```
//!
//! Only one orchestrator process may write the record at a time.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};

use crate::models::StreamState;
use crate::scheduler::Clock;
use crate::storage::{format_timestamp, parse_timestamp, Database};

/// Reader and writer of the stream state record
#[derive(Clone)]
pub struct StateManager {
    db: Database,
    clock: Arc<dyn Clock>,
}

impl StateManager {
    /// Attach to the database, creating the record if it does not exist
    pub fn new(db: Database, clock: Arc<dyn Clock>) -> Result<Self> {
        {
            let conn = db.lock()?;
            conn.execute(
                "INSERT INTO stream_state (id, hls_sequence) VALUES (1, 0)
                 ON CONFLICT(id) DO NOTHING",
                [],
            )
            .context("Failed to create stream state record")?;
        }

        Ok(Self { db, clock })
    }

    /// Read the persisted state
    pub fn get_current_state(&self) -> Result<StreamState> {
        let conn = self.db.lock()?;
        let row = conn
            .query_row(
                "SELECT track_id, hls_sequence, started_at, updated_at FROM stream_state WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
            .context("Failed to read stream state")?;

        let Some((track_id, sequence, started_at, updated_at)) = row else {
            return Ok(StreamState::default());
        };

        Ok(StreamState {
            track_id,
            hls_sequence: sequence.max(0) as u64,
            started_at: started_at.as_deref().and_then(parse_timestamp),
            updated_at: updated_at.as_deref().and_then(parse_timestamp),
        })
    }

    /// Record a track start
    ///
    /// The sequence never moves backwards; a lower value is ignored.
    pub fn update_track(&self, track_id: i64, sequence: u64) -> Result<()> {
        let now = format_timestamp(self.clock.now());
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE stream_state
             SET track_id = ?1, hls_sequence = MAX(hls_sequence, ?2), started_at = ?3, updated_at = ?3
             WHERE id = 1",
            params![track_id, sequence as i64, now],
        )
        .context("Failed to update stream state track")?;
        Ok(())
    }

    /// Record an emitted segment index
    pub fn increment_sequence(&self, sequence: u64) -> Result<()> {
        let now = format_timestamp(self.clock.now());
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE stream_state
             SET hls_sequence = MAX(hls_sequence, ?1), updated_at = ?2
             WHERE id = 1",
            params![sequence as i64, now],
        )
        .context("Failed to advance stream state sequence")?;
        Ok(())
    }

    /// Restart numbering for a cold start
    pub fn reset_sequence(&self) -> Result<()> {
        let now = format_timestamp(self.clock.now());
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE stream_state SET hls_sequence = 0, updated_at = ?1 WHERE id = 1",
            params![now],
        )
        .context("Failed to reset stream state sequence")?;
        Ok(())
    }

    /// Decide how a process starting now should begin
    pub fn plan_resume(&self, window: Duration, margin: u64) -> Result<ResumePlan> {
        let state = self.get_current_state()?;
        Ok(ResumePlan::from_state(&state, self.clock.now(), window, margin))
    }
}

// ============================================================================
// Resume Decision
// ============================================================================

/// How the encoder's segment numbering and the first track are chosen
#[derive(Debug, Clone, PartialEq)]
pub enum ResumePlan {
    /// Continue a live sequence interrupted moments ago
    Warm {
        track_id: Option<i64>,
        start_sequence: u64,
        age: Duration,
    },
    /// Start a new sequence at zero
    Cold,
}

impl ResumePlan {
    /// Warm when the record was touched within `window` of `now`
    pub fn from_state(
        state: &StreamState,
        now: DateTime<Utc>,
        window: Duration,
        margin: u64,
    ) -> Self {
        let Some(updated_at) = state.updated_at else {
            return Self::Cold;
        };

        let age = now - updated_at;
        if age >= window {
            return Self::Cold;
        }

        Self::Warm {
            track_id: state.track_id,
            start_sequence: state.hls_sequence.saturating_add(margin),
            age,
        }
    }

    pub fn is_warm(&self) -> bool {
        matches!(self, Self::Warm { .. })
    }

    /// First segment index the encoder should emit
    pub fn start_sequence(&self) -> u64 {
        match self {
            Self::Warm { start_sequence, .. } => *start_sequence,
            Self::Cold => 0,
        }
    }

    /// Track to replay first, if any
    pub fn resume_track(&self) -> Option<i64> {
        match self {
            Self::Warm { track_id, .. } => *track_id,
            Self::Cold => None,
        }
    }
}

impl fmt::Display for ResumePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warm {
                track_id,
                start_sequence,
                age,
            } => {
                write!(f, "warm resume at sequence {start_sequence}")?;
                if let Some(id) = track_id {
                    write!(f, ", replaying track {id}")?;
                }
                write!(f, " (state {}s old)", age.num_seconds())
            }
            Self::Cold => f.write_str("cold start at sequence 0"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Track;
    use crate::scheduler::FixedClock;
    use crate::storage::{SqliteTrackRepository, TrackRepository};
    use chrono::TimeZone;

    fn setup() -> (Database, Arc<FixedClock>, StateManager, i64) {
        let db = Database::in_memory().unwrap();
        let track_id = SqliteTrackRepository::new(db.clone())
            .upsert_track(&Track {
                key: "music/a.mp3".to_string(),
                ..Default::default()
            })
            .unwrap();
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 7, 12, 0, 0).unwrap(),
        ));
        let state = StateManager::new(db.clone(), clock.clone()).unwrap();
        (db, clock, state, track_id)
    }

    #[test]
    fn test_record_created_once() {
        let (db, clock, state, track_id) = setup();
        state.update_track(track_id, 5).unwrap();

        // Re-attaching must not reset the record
        let again = StateManager::new(db.clone(), clock).unwrap();
        assert_eq!(again.get_current_state().unwrap().hls_sequence, 5);

        let conn = db.lock().unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM stream_state", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_fresh_record_is_cold() {
        let (_, _, state, _) = setup();
        let fresh = state.get_current_state().unwrap();
        assert_eq!(fresh.track_id, None);
        assert_eq!(fresh.updated_at, None);
        assert_eq!(
            state.plan_resume(Duration::minutes(10), 2).unwrap(),
            ResumePlan::Cold
        );
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let (_, _, state, track_id) = setup();
        state.increment_sequence(10).unwrap();
        state.increment_sequence(12).unwrap();
        state.increment_sequence(11).unwrap();
        state.update_track(track_id, 3).unwrap();

        let current = state.get_current_state().unwrap();
        assert_eq!(current.hls_sequence, 12);
        assert_eq!(current.track_id, Some(track_id));

        state.reset_sequence().unwrap();
        assert_eq!(state.get_current_state().unwrap().hls_sequence, 0);
    }

    #[test]
    fn test_warm_resume_within_window() {
        let (_, clock, state, track_id) = setup();
        state.update_track(track_id, 0).unwrap();
        state.increment_sequence(500).unwrap();

        clock.advance(Duration::minutes(4));
        let plan = state.plan_resume(Duration::minutes(10), 2).unwrap();
        assert!(plan.is_warm());
        assert_eq!(plan.start_sequence(), 502);
        assert_eq!(plan.resume_track(), Some(track_id));
        assert!(plan.to_string().contains("502"));

        clock.advance(Duration::minutes(6));
        let plan = state.plan_resume(Duration::minutes(10), 2).unwrap();
        assert_eq!(plan, ResumePlan::Cold);
        assert_eq!(plan.start_sequence(), 0);
        assert_eq!(plan.resume_track(), None);
    }
}
