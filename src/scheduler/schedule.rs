//! Calendar slot matching and slot sources
//!
//! Slots come from a [`ScheduleSource`]: either the station database or a
//! TOML [`Timetable`] owned by the scheduler. Matching is pure and works on
//! local wall-clock time.
//!
//! # Timetable format
//!
//! ```toml
//! [[slots]]
//! name = "Late Night Techno"
//! days = ["Fri", "Sat"]
//! start = "22:00"
//! end = "04:00"
//!
//! [slots.program]
//! type = "rules"
//! mode = "harmonic"
//! styles = ["Techno", "Minimal"]
//! min_bpm = 120.0
//! max_bpm = 140.0
//!
//! [[slots]]
//! name = "New Year Special"
//! date = "2025-12-31"
//! start = "20:00"
//! end = "02:00"
//!
//! [slots.program]
//! type = "playlist"
//! name = "Countdown"
//! track_keys = ["music/countdown/01.mp3", "music/countdown/02.mp3"]
//! ```

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{Datelike, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use super::error::{SchedulerError, SchedulerResult};
use crate::models::ScheduleSlot;

// ============================================================================
// Time Matching
// ============================================================================

/// Parse an "HH:MM" time of day
pub fn parse_hhmm(value: &str) -> SchedulerResult<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|_| SchedulerError::invalid_time(value))
}

/// Check whether `current` falls inside the `[start, end)` window
///
/// When `start > end` the window crosses midnight and matches
/// `current >= start || current < end`. Empty or malformed bounds never
/// match.
pub fn is_time_match(start: &str, end: &str, current: &str) -> bool {
    let (Ok(start), Ok(end), Ok(current)) =
        (parse_hhmm(start), parse_hhmm(end), parse_hhmm(current))
    else {
        return false;
    };

    window_contains(start, end, current)
}

fn window_contains(start: NaiveTime, end: NaiveTime, current: NaiveTime) -> bool {
    if start <= end {
        current >= start && current < end
    } else {
        current >= start || current < end
    }
}

fn slot_window_contains(slot: &ScheduleSlot, current: NaiveTime) -> bool {
    match (parse_hhmm(&slot.start), parse_hhmm(&slot.end)) {
        (Ok(start), Ok(end)) => window_contains(start, end, current),
        _ => false,
    }
}

/// Whether a one-time slot is on air at `now`
///
/// The slot's date must be today; a crossover window only covers the
/// evening part of that date and the early morning before it.
pub fn one_time_matches(slot: &ScheduleSlot, now: NaiveDateTime) -> bool {
    slot.date == Some(now.date()) && slot_window_contains(slot, now.time())
}

/// Whether a recurring weekday slot is on air at `now`
///
/// Today's weekday must be in the slot's day set and the time of day must
/// fall inside its window, crossover included.
pub fn recurring_matches(slot: &ScheduleSlot, now: NaiveDateTime) -> bool {
    slot.date.is_none()
        && slot.days.contains(&now.weekday())
        && slot_window_contains(slot, now.time())
}

/// Resolve the single active slot for `now`
///
/// Priority: one-time slots dated today, then recurring weekday slots, then
/// `None` (the caller substitutes the fallback). Within a tier the first
/// slot in source order wins.
pub fn resolve_active(slots: &[ScheduleSlot], now: NaiveDateTime) -> Option<&ScheduleSlot> {
    let active = || slots.iter().filter(|s| s.is_active);

    active()
        .find(|s| one_time_matches(s, now))
        .or_else(|| active().find(|s| recurring_matches(s, now)))
}

// ============================================================================
// Slot Sources
// ============================================================================

/// Provider of calendar slots
pub trait ScheduleSource: Send + Sync {
    /// Name used in log lines
    fn name(&self) -> &str;

    /// All configured slots, active or not
    fn slots(&self) -> SchedulerResult<Vec<ScheduleSlot>>;
}

/// On-disk timetable document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimetableFile {
    #[serde(default)]
    pub slots: Vec<ScheduleSlot>,
}

impl TimetableFile {
    /// Parse and validate a timetable document
    pub fn parse(content: &str, origin: &str) -> SchedulerResult<Self> {
        let file: Self = toml::from_str(content).map_err(|e| SchedulerError::ParseError {
            path: origin.to_string(),
            reason: e.to_string(),
        })?;

        for slot in &file.slots {
            parse_hhmm(&slot.start)
                .and_then(|_| parse_hhmm(&slot.end))
                .map_err(|e| SchedulerError::invalid_slot(&slot.name, e.to_string()))?;

            if slot.date.is_none() && slot.days.is_empty() {
                return Err(SchedulerError::invalid_slot(
                    &slot.name,
                    "recurring slot has no days",
                ));
            }
        }

        Ok(file)
    }
}

/// Explicit, reloadable timetable
///
/// Holds the slot list behind a read/write lock; [`Timetable::reload`]
/// swaps it atomically. A failed reload keeps the previous slots.
#[derive(Debug)]
pub struct Timetable {
    slots: RwLock<Vec<ScheduleSlot>>,
    path: Option<PathBuf>,
}

impl Timetable {
    /// Create an in-memory timetable
    pub fn new(slots: Vec<ScheduleSlot>) -> Self {
        Self {
            slots: RwLock::new(slots),
            path: None,
        }
    }

    /// Load a timetable from a TOML file
    pub fn with_file(path: impl Into<PathBuf>) -> SchedulerResult<Self> {
        let path = path.into();
        let slots = Self::read_file(&path)?;

        Ok(Self {
            slots: RwLock::new(slots),
            path: Some(path),
        })
    }

    fn read_file(path: &Path) -> SchedulerResult<Vec<ScheduleSlot>> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SchedulerError::io_error(format!("read {}", path.display()), e.to_string())
        })?;

        Ok(TimetableFile::parse(&content, &path.display().to_string())?.slots)
    }

    /// Re-read the backing file, returning the number of slots loaded
    pub fn reload(&self) -> SchedulerResult<usize> {
        let Some(path) = &self.path else {
            return Ok(self.len());
        };

        let slots = Self::read_file(path)?;
        let count = slots.len();
        *self.slots.write().unwrap_or_else(|e| e.into_inner()) = slots;

        tracing::info!(path = %path.display(), slots = count, "Timetable reloaded");
        Ok(count)
    }

    /// Replace the slot list
    pub fn replace(&self, slots: Vec<ScheduleSlot>) {
        *self.slots.write().unwrap_or_else(|e| e.into_inner()) = slots;
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Check if the timetable has no slots
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ScheduleSource for Timetable {
    fn name(&self) -> &str {
        "timetable"
    }

    fn slots(&self) -> SchedulerResult<Vec<ScheduleSlot>> {
        Ok(self.slots.read().unwrap_or_else(|e| e.into_inner()).clone())
    }
}
