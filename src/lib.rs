//! onair - unattended internet-radio playout engine
//!
//! Picks tracks according to a weekly program calendar, streams them through
//! an external HLS encoder and ships the resulting segments to an object
//! store, resuming a live sequence seamlessly after a crash.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`scheduler`] - Program calendar and active slot resolution
//! - [`selector`] - Track selection strategies (starvation, harmonic, random)
//! - [`cache`] - Deduplicating local track cache
//! - [`state`] - Durable stream state and resume planning
//! - [`streaming`] - Producer loop, encoder process and segment uploader
//! - [`storage`] - Station database and object store
//! - [`server`] - Helper HTTP endpoint
//! - [`metrics`] - Prometheus metrics
//! - [`models`] - Core data structures and types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use onair::prelude::*;
//! use onair::scheduler::{Scheduler, SystemClock};
//! use onair::storage::{LocalObjectStore, SqliteScheduleRepository, SqliteTrackRepository};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Database::open(&config.database.sqlite_path)?;
//!     let clock = Arc::new(SystemClock);
//!
//!     let store = Arc::new(LocalObjectStore::new(&config.storage.root)?);
//!     let storage = StorageClient::new(store, &config.storage.bucket_prod, &config.storage.bucket_stream);
//!     let cache = TrackCache::new(storage.clone(), &config.radio.cache_dir)?;
//!     let state = StateManager::new(db.clone(), clock.clone())?;
//!     let scheduler = Scheduler::new(Arc::new(SqliteScheduleRepository::new(db.clone())), clock);
//!     let repo = Arc::new(SqliteTrackRepository::new(db));
//!
//!     let engine = Engine::new(config, scheduler, repo, cache, state, storage);
//!     let (_tx, shutdown) = tokio::sync::watch::channel(false);
//!     engine.run(shutdown).await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod selector;
pub mod server;
pub mod state;
pub mod storage;
pub mod streaming;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::cache::TrackCache;
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, OnAirErrorTrait, Result};
    pub use crate::models::{NowPlaying, RuleSet, ScheduleSlot, StreamState, Track};
    pub use crate::selector::{Selector, SelectorMode, SelectorRegistry};
    pub use crate::state::{ResumePlan, StateManager};
    pub use crate::storage::{Database, StorageClient, TrackRepository};
    pub use crate::streaming::Engine;
}

// Direct re-exports for convenience
pub use models::{ScheduleSlot, StreamState, Track};
