//! Filtered uniform pick
//!
//! The safety net behind every other strategy: it relaxes all the way down
//! to "anything in the namespace" so the playout loop always makes progress.

use std::sync::Arc;

use super::{build_pool, PoolRequest, Selector, SelectorResult};
use crate::config::SelectionConfig;
use crate::models::{RuleSet, Track};
use crate::scheduler::Clock;
use crate::storage::{TrackOrder, TrackRepository};

/// Uniform random selector bound to one namespace
pub struct RandomSelector {
    repo: Arc<dyn TrackRepository>,
    clock: Arc<dyn Clock>,
    prefix: String,
    settings: SelectionConfig,
}

impl RandomSelector {
    pub fn new(
        repo: Arc<dyn TrackRepository>,
        clock: Arc<dyn Clock>,
        prefix: &str,
        settings: SelectionConfig,
    ) -> Self {
        Self {
            repo,
            clock,
            prefix: prefix.to_string(),
            settings,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl Selector for RandomSelector {
    fn name(&self) -> &str {
        "random"
    }

    fn pick_track(&self, rules: &RuleSet, last: Option<&Track>) -> SelectorResult<Track> {
        let (mut pool, _) = build_pool(
            self.repo.as_ref(),
            PoolRequest {
                selector: self.name(),
                prefix: &self.prefix,
                rules,
                cutoff: self.clock.now() - self.settings.exclusion_window(),
                exclude_artists: Vec::new(),
                exclude_ids: last.map(|t| vec![t.id]).unwrap_or_default(),
                order: TrackOrder::Random,
                limit: 1,
                min_pool: 1,
            },
        )?;

        Ok(pool.swap_remove(0))
    }
}
