//! Program scheduler
//!
//! Resolves "what program is on air right now" from a calendar of slots.
//!
//! # Overview
//!
//! Slots are supplied by a [`ScheduleSource`]: the station database or an
//! explicit TOML [`Timetable`]. The scheduler never mutates anything and
//! never fails its caller: when the source is unreachable or no slot
//! matches, the built-in "General Rotation" slot is returned.
//!
//! # Priority
//!
//! ```text
//!  now ──► one-time slot dated today? ──yes──► that slot
//!              │ no
//!              ▼
//!          recurring slot for today's weekday
//!          whose window contains now?  ──yes──► that slot
//!              │ no
//!              ▼
//!          General Rotation (unrestricted)
//! ```
//!
//! # Modules
//!
//! - [`clock`] - Time source abstraction
//! - [`schedule`] - Window matching, slot sources and the timetable
//! - [`error`] - Scheduler error types

pub mod clock;
pub mod error;
pub mod schedule;

use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::models::ScheduleSlot;

// Re-export main types
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{SchedulerError, SchedulerResult};
pub use schedule::{is_time_match, resolve_active, ScheduleSource, Timetable, TimetableFile};

/// Resolves the active slot from a slot source
#[derive(Clone)]
pub struct Scheduler {
    source: Arc<dyn ScheduleSource>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Create a scheduler on top of a slot source
    pub fn new(source: Arc<dyn ScheduleSource>, clock: Arc<dyn Clock>) -> Self {
        Self { source, clock }
    }

    /// Active slot at a local wall-clock instant
    pub fn active_slot(&self, now: NaiveDateTime) -> ScheduleSlot {
        let slots = match self.source.slots() {
            Ok(slots) => slots,
            Err(e) => {
                tracing::warn!(
                    source = self.source.name(),
                    error = %e,
                    "Schedule source unavailable, using fallback slot"
                );
                return ScheduleSlot::fallback();
            }
        };

        match resolve_active(&slots, now) {
            Some(slot) => slot.clone(),
            None => ScheduleSlot::fallback(),
        }
    }

    /// Active slot right now
    pub fn current_slot(&self) -> ScheduleSlot {
        self.active_slot(self.clock.now_local())
    }

    /// Clock used by this scheduler
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Program, RuleSet, FALLBACK_SLOT_NAME};
    use chrono::{TimeZone, Utc, Weekday};

    struct BrokenSource;

    impl ScheduleSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        fn slots(&self) -> SchedulerResult<Vec<ScheduleSlot>> {
            Err(SchedulerError::source_unavailable("broken", "database is locked"))
        }
    }

    fn clock_at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Arc<dyn Clock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap(),
        ))
    }

    #[test]
    fn test_unreachable_source_degrades_to_fallback() {
        let scheduler = Scheduler::new(Arc::new(BrokenSource), clock_at(2025, 3, 7, 12, 0));
        let slot = scheduler.current_slot();
        assert_eq!(slot.name, FALLBACK_SLOT_NAME);
        assert!(slot.is_fallback());
    }

    #[test]
    fn test_current_slot_uses_clock() {
        let timetable = Timetable::new(vec![ScheduleSlot {
            id: Some(7),
            name: "Lunch".to_string(),
            is_active: true,
            days: vec![Weekday::Fri],
            date: None,
            start: "12:00".to_string(),
            end: "14:00".to_string(),
            program: Program::Rules(RuleSet {
                mode: "random".to_string(),
                ..Default::default()
            }),
        }]);

        let scheduler = Scheduler::new(Arc::new(timetable), clock_at(2025, 3, 7, 12, 0));
        assert_eq!(scheduler.current_slot().name, "Lunch");

        let scheduler = Scheduler::new(
            Arc::new(Timetable::new(Vec::new())),
            clock_at(2025, 3, 7, 12, 0),
        );
        assert_eq!(scheduler.current_slot().name, FALLBACK_SLOT_NAME);
    }
}
