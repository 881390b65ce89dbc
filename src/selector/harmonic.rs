//! DJ-style harmonic chaining
//!
//! Each pick is scored against the previous track with [`mix_score`] plus a
//! small jitter, and the lowest score wins. The only state carried between
//! picks is the previous track, which the caller supplies.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::camelot::mix_score;
use super::{build_pool, separated_artists, PoolRequest, RelaxationTier, Selector, SelectorResult};
use crate::config::SelectionConfig;
use crate::models::{RuleSet, Track};
use crate::scheduler::Clock;
use crate::storage::{TrackOrder, TrackRepository};

/// Number of most-starved candidates a chain may start from
const SEED_WINDOW: usize = 20;

/// Lowest-mix-score selector
pub struct HarmonicSelector {
    repo: Arc<dyn TrackRepository>,
    clock: Arc<dyn Clock>,
    prefix: String,
    settings: SelectionConfig,
    rng: Mutex<ChaCha8Rng>,
    tier: Mutex<RelaxationTier>,
}

impl HarmonicSelector {
    pub fn new(
        repo: Arc<dyn TrackRepository>,
        clock: Arc<dyn Clock>,
        prefix: &str,
        settings: SelectionConfig,
    ) -> Self {
        Self::with_rng(repo, clock, prefix, settings, ChaCha8Rng::from_entropy())
    }

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
            rng: Mutex::new(rng),
            tier: Mutex::new(RelaxationTier::Strict),
        }
    }

    fn rng(&self) -> MutexGuard<'_, ChaCha8Rng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Relaxation applied to the most recent pool
    pub fn relaxation(&self) -> RelaxationTier {
        *self.tier.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn jitter(&self, rng: &mut ChaCha8Rng) -> f64 {
        let width = self.settings.jitter;
        if width > 0.0 {
            rng.gen_range(-width..width)
        } else {
            0.0
        }
    }
}

/// Candidates that may follow `anchor`
///
/// A relaxed pool carries no exclusions, so the anchor itself and its
/// artist are dropped here whenever the pool offers something else.
fn successors<'a>(pool: &'a [Track], anchor: &Track) -> Vec<&'a Track> {
    let others: Vec<&Track> = pool.iter().filter(|t| t.id != anchor.id).collect();
    if others.is_empty() {
        return pool.iter().collect();
    }

    let other_artists: Vec<&Track> = others
        .iter()
        .copied()
        .filter(|t| anchor.artist.is_empty() || t.artist != anchor.artist)
        .collect();
    if other_artists.is_empty() {
        others
    } else {
        other_artists
    }
}

impl Selector for HarmonicSelector {
    fn name(&self) -> &str {
        "harmonic"
    }

    fn pick_track(&self, rules: &RuleSet, last: Option<&Track>) -> SelectorResult<Track> {
        // The anchor's play may not be recorded yet, so exclude it explicitly
        let exclude_artists =
            separated_artists(self.repo.as_ref(), self.settings.artist_separation, last)?;
        let exclude_ids = last.map(|t| vec![t.id]).unwrap_or_default();
        let cutoff = self.clock.now() - self.settings.exclusion_window();

        let (pool, tier) = build_pool(
            self.repo.as_ref(),
            PoolRequest {
                selector: self.name(),
                prefix: &self.prefix,
                rules,
                cutoff,
                exclude_artists,
                exclude_ids,
                order: TrackOrder::Starved,
                limit: self.settings.harmonic_pool_size,
                min_pool: self.settings.min_pool,
            },
        )?;
        *self.tier.lock().unwrap_or_else(PoisonError::into_inner) = tier;

        let mut rng = self.rng();

        let Some(anchor) = last else {
            let window = pool.len().min(SEED_WINDOW);
            let index = rng.gen_range(0..window);
            return Ok(pool[index].clone());
        };

        let best = successors(&pool, anchor)
            .into_iter()
            .map(|candidate| {
                let score = mix_score(anchor, candidate) + self.jitter(&mut rng);
                (score, candidate)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));

        match best {
            Some((score, track)) => {
                tracing::debug!(
                    from = %anchor.label(),
                    to = %track.label(),
                    score,
                    "Harmonic transition chosen"
                );
                Ok(track.clone())
            }
            None => Ok(pool[0].clone()),
        }
    }
}
