//! Track selection strategies
//!
//! A selector turns the active program's [`RuleSet`] and the previously
//! played track into the next track to air. Every strategy reads through a
//! [`TrackRepository`] with a mandatory namespace prefix and never returns a
//! track outside it.
//!
//! # Strategies
//!
//! - [`StarvationSelector`] - fairness rotation over least-played tracks
//! - [`HarmonicSelector`] - BPM, key and energy aware chaining
//! - [`RandomSelector`] - filtered uniform pick, always-available safety net
//! - [`PlaylistSelector`] - fixed track order for playlist slots
//!
//! # Relaxation
//!
//! When the constrained pool is too small, constraints are dropped in a
//! fixed order. The namespace prefix is never dropped.
//!
//! ```text
//!  Strict ──► AttributesDropped ──► GenreDropped ──► OldestInNamespace
//!  (all)      (genre kept)          (window and      (prefix only)
//!                                    artists kept)
//! ```

pub mod camelot;
pub mod harmonic;
pub mod playlist;
pub mod random;
pub mod starvation;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::SelectionConfig;
use crate::models::{RuleSet, Track};
use crate::scheduler::Clock;
use crate::storage::{TrackOrder, TrackQuery, TrackRepository};

pub use camelot::{are_keys_compatible, mix_score, CamelotKey, CamelotLetter};
pub use harmonic::HarmonicSelector;
pub use playlist::PlaylistSelector;
pub use random::RandomSelector;
pub use starvation::StarvationSelector;

// ============================================================================
// Errors
// ============================================================================

/// Selection errors
#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    /// Nothing in the namespace could be selected, even after relaxation
    #[error("{selector}: no candidate tracks available")]
    NoCandidates { selector: String },

    /// Mode identifier not known to the registry
    #[error("unknown selector mode '{mode}' (expected starvation, harmonic or random)")]
    UnknownMode { mode: String },

    /// Track repository failure
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SelectorError {
    pub fn no_candidates(selector: impl Into<String>) -> Self {
        Self::NoCandidates {
            selector: selector.into(),
        }
    }

    /// Whether the next loop iteration may succeed where this one failed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NoCandidates { .. } => true,
            Self::Storage(_) => true,
            Self::UnknownMode { .. } => false,
        }
    }
}

pub type SelectorResult<T> = std::result::Result<T, SelectorError>;

// ============================================================================
// Selector Trait
// ============================================================================

/// A track selection strategy
pub trait Selector: Send + Sync {
    /// Strategy name used in logs
    fn name(&self) -> &str;

    /// Choose the next track under `rules`, given the previously aired track
    fn pick_track(&self, rules: &RuleSet, last: Option<&Track>) -> SelectorResult<Track>;

    /// Keys of up to `n` tracks this strategy will most likely pick next
    fn peek(&self, _n: usize) -> Vec<String> {
        Vec::new()
    }
}

// ============================================================================
// Modes
// ============================================================================

/// Rule-driven selection modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SelectorMode {
    #[default]
    Starvation,
    Harmonic,
    Random,
}

impl SelectorMode {
    pub fn all() -> [Self; 3] {
        [Self::Starvation, Self::Harmonic, Self::Random]
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::Starvation => "starvation",
            Self::Harmonic => "harmonic",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for SelectorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for SelectorMode {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starvation" => Ok(Self::Starvation),
            "harmonic" => Ok(Self::Harmonic),
            "random" => Ok(Self::Random),
            _ => Err(SelectorError::UnknownMode {
                mode: s.to_string(),
            }),
        }
    }
}

// ============================================================================
// Relaxation
// ============================================================================

/// How far constraints were relaxed to build a candidate pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RelaxationTier {
    /// All rule set filters, exclusion window and artist separation
    #[default]
    Strict,
    /// Style, BPM and year filters dropped
    AttributesDropped,
    /// Genre dropped as well
    GenreDropped,
    /// Least recently played tracks in the namespace, nothing else applied,
    /// not even the exclusion of the previous track
    OldestInNamespace,
}

impl RelaxationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::AttributesDropped => "attributes_dropped",
            Self::GenreDropped => "genre_dropped",
            Self::OldestInNamespace => "oldest_in_namespace",
        }
    }
}

impl fmt::Display for RelaxationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for building a relaxed candidate pool
pub(crate) struct PoolRequest<'a> {
    pub selector: &'a str,
    pub prefix: &'a str,
    pub rules: &'a RuleSet,
    pub cutoff: DateTime<Utc>,
    pub exclude_artists: Vec<String>,
    pub exclude_ids: Vec<i64>,
    pub order: TrackOrder,
    pub limit: usize,
    pub min_pool: usize,
}

/// Query the repository, relaxing constraints until the pool is large enough
pub(crate) fn build_pool(
    repo: &dyn TrackRepository,
    req: PoolRequest<'_>,
) -> SelectorResult<(Vec<Track>, RelaxationTier)> {
    let strict = TrackQuery::new(req.prefix)
        .with_rules(req.rules)
        .played_before(req.cutoff)
        .excluding_artists(req.exclude_artists)
        .excluding_ids(req.exclude_ids)
        .order(req.order)
        .limit(req.limit);

    let ladder = [
        (RelaxationTier::Strict, strict.clone()),
        (
            RelaxationTier::AttributesDropped,
            strict.clone().without_attribute_filters(),
        ),
        (
            RelaxationTier::GenreDropped,
            strict.without_attribute_filters().without_genre(),
        ),
    ];

    let mut tried: Vec<TrackQuery> = Vec::with_capacity(ladder.len());
    for (tier, query) in ladder {
        if tried.contains(&query) {
            continue;
        }

        let pool = repo.find_tracks(&query)?;
        if pool.len() >= req.min_pool.max(1) {
            if tier != RelaxationTier::Strict {
                tracing::warn!(
                    selector = req.selector,
                    program = %req.rules.name,
                    tier = %tier,
                    candidates = pool.len(),
                    "Constraints relaxed to fill candidate pool"
                );
            }
            return Ok((pool, tier));
        }
        tried.push(query);
    }

    let last_resort = TrackQuery::new(req.prefix)
        .order(req.order)
        .limit(req.limit);
    let pool = repo.find_tracks(&last_resort)?;

    if pool.is_empty() {
        return Err(SelectorError::no_candidates(req.selector));
    }

    tracing::warn!(
        selector = req.selector,
        program = %req.rules.name,
        prefix = req.prefix,
        candidates = pool.len(),
        "Falling back to least recently played tracks in namespace"
    );

    Ok((pool, RelaxationTier::OldestInNamespace))
}

/// Recently aired artists plus the artist of the previous track
pub(crate) fn separated_artists(
    repo: &dyn TrackRepository,
    depth: usize,
    last: Option<&Track>,
) -> SelectorResult<Vec<String>> {
    let mut artists = repo.recent_artists(depth)?;
    if let Some(track) = last {
        if !track.artist.is_empty() && !artists.contains(&track.artist) {
            artists.push(track.artist.clone());
        }
    }
    Ok(artists)
}

// ============================================================================
// Registry
// ============================================================================

/// Total mapping from mode identifiers to selector instances
///
/// Every mode has exactly one long-lived instance, so per-strategy state
/// (the starvation queue, the RNG) survives across picks.
#[derive(Clone)]
pub struct SelectorRegistry {
    starvation: Arc<StarvationSelector>,
    harmonic: Arc<HarmonicSelector>,
    random: Arc<RandomSelector>,
    default_mode: SelectorMode,
}

impl SelectorRegistry {
    /// Build all strategies over one namespace
    pub fn new(
        repo: Arc<dyn TrackRepository>,
        clock: Arc<dyn Clock>,
        prefix: &str,
        settings: SelectionConfig,
        default_mode: SelectorMode,
    ) -> Self {
        Self {
            starvation: Arc::new(StarvationSelector::new(
                repo.clone(),
                clock.clone(),
                prefix,
                settings.clone(),
            )),
            harmonic: Arc::new(HarmonicSelector::new(
                repo.clone(),
                clock.clone(),
                prefix,
                settings.clone(),
            )),
            random: Arc::new(RandomSelector::new(repo, clock, prefix, settings)),
            default_mode,
        }
    }

    /// Selector for a known mode
    pub fn get(&self, mode: SelectorMode) -> Arc<dyn Selector> {
        match mode {
            SelectorMode::Starvation => self.starvation.clone(),
            SelectorMode::Harmonic => self.harmonic.clone(),
            SelectorMode::Random => self.random.clone(),
        }
    }

    /// Map a slot's mode string to a mode, defaulting when empty or unknown
    pub fn resolve_mode(&self, mode: &str) -> SelectorMode {
        if mode.trim().is_empty() {
            return self.default_mode;
        }

        match mode.parse() {
            Ok(mode) => mode,
            Err(_) => {
                tracing::warn!(
                    mode,
                    default = %self.default_mode,
                    "Unknown selector mode, using default"
                );
                self.default_mode
            }
        }
    }

    /// Selector for a slot's mode string
    pub fn resolve(&self, mode: &str) -> Arc<dyn Selector> {
        self.get(self.resolve_mode(mode))
    }

    /// Safety-net selector used when the mapped strategy fails
    pub fn fallback(&self) -> Arc<dyn Selector> {
        self.random.clone()
    }

    pub fn starvation(&self) -> &Arc<StarvationSelector> {
        &self.starvation
    }

    pub fn default_mode(&self) -> SelectorMode {
        self.default_mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::FixedClock;
    use crate::storage::{Database, SqliteTrackRepository};

    fn registry(default_mode: SelectorMode) -> SelectorRegistry {
        let repo = Arc::new(SqliteTrackRepository::new(Database::in_memory().unwrap()));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        SelectorRegistry::new(repo, clock, "music/", SelectionConfig::default(), default_mode)
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("starvation".parse::<SelectorMode>().unwrap(), SelectorMode::Starvation);
        assert_eq!(" Harmonic ".parse::<SelectorMode>().unwrap(), SelectorMode::Harmonic);
        assert_eq!("RANDOM".parse::<SelectorMode>().unwrap(), SelectorMode::Random);
        assert!("".parse::<SelectorMode>().is_err());

        let err = "deck".parse::<SelectorMode>().unwrap_err();
        assert!(err.to_string().contains("'deck'"));
        assert!(!err.is_recoverable());

        for mode in SelectorMode::all() {
            assert_eq!(mode.to_string().parse::<SelectorMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_resolution_is_total() {
        let registry = registry(SelectorMode::Starvation);

        assert_eq!(registry.resolve_mode("harmonic"), SelectorMode::Harmonic);
        assert_eq!(registry.resolve_mode(""), SelectorMode::Starvation);
        assert_eq!(registry.resolve_mode("timetable"), SelectorMode::Starvation);

        assert_eq!(registry.resolve("").name(), "starvation");
        assert_eq!(registry.resolve("random").name(), "random");
        assert_eq!(registry.fallback().name(), "random");

        let registry = self::registry(SelectorMode::Random);
        assert_eq!(registry.resolve("nonsense").name(), "random");
    }

    #[test]
    fn test_relaxation_tiers_are_ordered() {
        assert!(RelaxationTier::Strict < RelaxationTier::AttributesDropped);
        assert!(RelaxationTier::GenreDropped < RelaxationTier::OldestInNamespace);
        assert_eq!(RelaxationTier::default().to_string(), "strict");
    }
}
