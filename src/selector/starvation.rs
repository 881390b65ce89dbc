//! Fairness rotation
//!
//! Builds a pool of the least-played eligible tracks, shuffles it and serves
//! picks from a working queue until the queue runs dry or the program
//! changes. Shuffling a starved pool rather than the whole library keeps
//! rotation fair without making it predictable.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{build_pool, separated_artists, PoolRequest, RelaxationTier, Selector, SelectorResult};
use crate::config::SelectionConfig;
use crate::models::{RuleSet, Track};
use crate::scheduler::Clock;
use crate::storage::{TrackOrder, TrackRepository};

struct Deck {
    /// Rule set the queue was built for
    program: Option<RuleSet>,
    queue: VecDeque<Track>,
    tier: RelaxationTier,
    rng: ChaCha8Rng,
}

/// Least-played-first selector with a shuffled working queue
pub struct StarvationSelector {
    repo: Arc<dyn TrackRepository>,
    clock: Arc<dyn Clock>,
    prefix: String,
    settings: SelectionConfig,
    deck: Mutex<Deck>,
}

impl StarvationSelector {
    pub fn new(
        repo: Arc<dyn TrackRepository>,
        clock: Arc<dyn Clock>,
        prefix: &str,
        settings: SelectionConfig,
    ) -> Self {
        Self::with_rng(repo, clock, prefix, settings, ChaCha8Rng::from_entropy())
    }

    /// Deterministic shuffles for tests and simulations
    pub fn with_seed(
        repo: Arc<dyn TrackRepository>,
        clock: Arc<dyn Clock>,
        prefix: &str,
        settings: SelectionConfig,
        seed: u64,
    ) -> Self {
        Self::with_rng(repo, clock, prefix, settings, ChaCha8Rng::seed_from_u64(seed))
    }

    fn with_rng(
        repo: Arc<dyn TrackRepository>,
        clock: Arc<dyn Clock>,
        prefix: &str,
        settings: SelectionConfig,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            repo,
            clock,
            prefix: prefix.to_string(),
            settings,
            deck: Mutex::new(Deck {
                program: None,
                queue: VecDeque::new(),
                tier: RelaxationTier::Strict,
                rng,
            }),
        }
    }

    fn deck(&self) -> MutexGuard<'_, Deck> {
        self.deck.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Relaxation applied when the current queue was built
    pub fn relaxation(&self) -> RelaxationTier {
        self.deck().tier
    }

    /// Number of tracks left in the working queue
    pub fn queued(&self) -> usize {
        self.deck().queue.len()
    }

    /// Drop the working queue so the next pick rebuilds it
    pub fn flush(&self) {
        self.deck().queue.clear();
    }

    fn refill(&self, deck: &mut Deck, rules: &RuleSet, last: Option<&Track>) -> SelectorResult<()> {
        let exclude_artists =
            separated_artists(self.repo.as_ref(), self.settings.artist_separation, last)?;
        let exclude_ids = last.map(|t| vec![t.id]).unwrap_or_default();
        let cutoff = self.clock.now() - self.settings.exclusion_window();

        let (mut pool, tier) = build_pool(
            self.repo.as_ref(),
            PoolRequest {
                selector: self.name(),
                prefix: &self.prefix,
                rules,
                cutoff,
                exclude_artists,
                exclude_ids,
                order: TrackOrder::Starved,
                limit: self.settings.pool_size,
                min_pool: self.settings.min_pool,
            },
        )?;

        pool.shuffle(&mut deck.rng);
        pool.truncate(self.settings.queue_size);

        tracing::debug!(
            program = %rules.name,
            queued = pool.len(),
            tier = %tier,
            "Starvation queue refilled"
        );

        deck.queue = pool.into();
        deck.tier = tier;
        Ok(())
    }
}

impl Selector for StarvationSelector {
    fn name(&self) -> &str {
        "starvation"
    }

    fn pick_track(&self, rules: &RuleSet, last: Option<&Track>) -> SelectorResult<Track> {
        let mut deck = self.deck();

        if deck.program.as_ref() != Some(rules) {
            if let Some(previous) = &deck.program {
                tracing::info!(
                    from = %previous.name,
                    to = %rules.name,
                    "Program change, flushing starvation queue"
                );
            }
            deck.queue.clear();
            deck.program = Some(rules.clone());
        }

        if deck.queue.is_empty() {
            self.refill(&mut deck, rules, last)?;
        }

        // Queue entries were separated when the pool was built; keep
        // consecutive picks apart as well.
        let avoid = last.map(|t| t.artist.as_str()).unwrap_or_default();
        let index = deck
            .queue
            .iter()
            .position(|t| avoid.is_empty() || t.artist != avoid)
            .unwrap_or(0);

        deck.queue
            .remove(index)
            .ok_or_else(|| super::SelectorError::no_candidates(self.name()))
    }

    fn peek(&self, n: usize) -> Vec<String> {
        self.deck()
            .queue
            .iter()
            .take(n)
            .map(|t| t.key.clone())
            .collect()
    }
}
