pub mod run;
pub mod simulate;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use onair::cache::TrackCache;
use onair::config::Config;
use onair::scheduler::{Clock, ScheduleSource, Scheduler, Timetable};
use onair::state::StateManager;
use onair::storage::{
    open_object_store, Database, SqliteScheduleRepository, SqliteTrackRepository, StorageClient,
};
use onair::streaming::Engine;

// Re-export command functions for convenience
pub use run::run;
pub use simulate::simulate;
pub use state::state;

/// Load and validate configuration
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Shared handles every command works with
pub struct Station {
    pub config: Config,
    pub db: Database,
    pub repo: Arc<SqliteTrackRepository>,
    pub storage: StorageClient,
    pub clock: Arc<dyn Clock>,
    /// Present when slots come from a timetable file
    pub timetable: Option<Arc<Timetable>>,
}

impl Station {
    /// Open the database and object store described by `config`
    pub fn open(config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        let db = Database::open(&config.database.sqlite_path)?;
        let repo = Arc::new(SqliteTrackRepository::new(db.clone()));

        let store = open_object_store(&config.storage).context("Failed to open object store")?;
        let storage = StorageClient::new(
            store,
            &config.storage.bucket_prod,
            &config.storage.bucket_stream,
        );

        let timetable = match &config.radio.timetable_path {
            Some(path) => Some(Arc::new(
                Timetable::with_file(path)
                    .with_context(|| format!("Failed to load timetable {}", path.display()))?,
            )),
            None => None,
        };

        Ok(Self {
            config,
            db,
            repo,
            storage,
            clock,
            timetable,
        })
    }

    pub fn scheduler(&self) -> Scheduler {
        let source: Arc<dyn ScheduleSource> = match &self.timetable {
            Some(timetable) => timetable.clone(),
            None => Arc::new(SqliteScheduleRepository::new(self.db.clone())),
        };
        Scheduler::new(source, self.clock.clone())
    }

    pub fn state_manager(&self) -> Result<StateManager> {
        StateManager::new(self.db.clone(), self.clock.clone())
    }

    pub fn engine(&self) -> Result<Engine> {
        let cache = TrackCache::new(self.storage.clone(), &self.config.radio.cache_dir)
            .context("Failed to open track cache")?;

        Ok(Engine::new(
            self.config.clone(),
            self.scheduler(),
            self.repo.clone(),
            cache,
            self.state_manager()?,
            self.storage.clone(),
        ))
    }
}
