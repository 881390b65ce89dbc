//! Streaming orchestrator
//!
//! One producer loop feeds the encoder's stdin with whole audio files, one
//! track at a time. The encoder reads at real-time pace, so the copy into
//! the pipe is what throttles the loop.
//!
//! ```text
//!  ┌──────────────┐   ┌───────────────┐   ┌──────────┐   ┌────────┐   ┌─────────────┐
//!  │ SELECT_TRACK │──►│ PERSIST_STATE │──►│ PREFETCH │──►│ STREAM │──►│ RECORD_PLAY │──┐
//!  └──────────────┘   └───────────────┘   └──────────┘   └────────┘   └─────────────┘  │
//!         ▲                                                                            │
//!         └────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Per-track failures are logged and the loop moves on. Only an encoder exit
//! ends a run; the caller restarts it and the persisted state turns that
//! restart into a warm resume.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::beacon::{self, NowPlayingBoard};
use super::encoder::EncoderCommand;
use super::uploader::SegmentUploader;
use crate::cache::TrackCache;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{NowPlaying, Program, RuleSet, ScheduleSlot, Track};
use crate::scheduler::{Clock, Scheduler};
use crate::selector::{
    PlaylistSelector, RandomSelector, Selector, SelectorMode, SelectorRegistry, SelectorResult,
};
use crate::state::{ResumePlan, StateManager};
use crate::storage::{StorageClient, TrackRepository};

// ============================================================================
// Selection
// ============================================================================

/// Why a track is on air
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Replay of the track interrupted by a restart
    Resume,
    Music,
    /// Station identification clip
    Jingle,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resume => "RESUME",
            Self::Music => "MUSIC",
            Self::Jingle => "JINGLE",
        }
    }
}

impl std::fmt::Display for TrackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chosen track with its context
#[derive(Debug, Clone)]
pub struct Selection {
    pub track: Track,
    pub kind: TrackKind,
    /// Active program name
    pub program: String,
    /// Strategy that produced the track
    pub selector: String,
    /// Keys expected to play next, for prefetching
    pub upcoming: Vec<String>,
}

/// Position of the producer between iterations
#[derive(Debug, Default)]
pub struct PlayoutCursor {
    last_music: Option<Track>,
    since_jingle: u32,
    resume: Option<i64>,
    sequence: u64,
}

impl PlayoutCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor for a run started under a resume decision
    pub fn from_plan(plan: &ResumePlan) -> Self {
        Self {
            resume: plan.resume_track(),
            sequence: plan.start_sequence(),
            ..Self::default()
        }
    }

    /// Anchor handed to the music selectors
    pub fn last_music(&self) -> Option<&Track> {
        self.last_music.as_ref()
    }

    /// Music tracks aired since the last jingle
    pub fn since_jingle(&self) -> u32 {
        self.since_jingle
    }

    fn advance(&mut self, selection: &Selection) {
        match selection.kind {
            TrackKind::Jingle => self.since_jingle = 0,
            TrackKind::Music => {
                self.since_jingle += 1;
                self.last_music = Some(selection.track.clone());
            }
            TrackKind::Resume => self.last_music = Some(selection.track.clone()),
        }
    }
}

/// Result of one producer iteration
pub struct Played {
    pub selection: Selection,
    /// Bytes written to the encoder, `None` when streaming failed
    pub bytes: Option<u64>,
    /// Background play recording, present when the track streamed
    pub recorded: Option<JoinHandle<()>>,
}

// ============================================================================
// Engine
// ============================================================================

/// Producer loop and the workers it drives
pub struct Engine {
    config: Config,
    scheduler: Scheduler,
    clock: Arc<dyn Clock>,
    selectors: SelectorRegistry,
    playlists: PlaylistSelector,
    jingles: RandomSelector,
    mode_override: Option<SelectorMode>,
    repo: Arc<dyn TrackRepository>,
    cache: TrackCache,
    state: StateManager,
    storage: StorageClient,
    board: NowPlayingBoard,
}

impl Engine {
    /// Wire the engine from validated configuration
    pub fn new(
        config: Config,
        scheduler: Scheduler,
        repo: Arc<dyn TrackRepository>,
        cache: TrackCache,
        state: StateManager,
        storage: StorageClient,
    ) -> Self {
        let clock = scheduler.clock().clone();
        let default_mode = config.radio.default_mode.parse().unwrap_or_default();

        let selectors = SelectorRegistry::new(
            repo.clone(),
            clock.clone(),
            &config.radio.music_prefix,
            config.selection.clone(),
            default_mode,
        );
        let playlists = PlaylistSelector::new(repo.clone(), &config.radio.music_prefix);
        let jingles = RandomSelector::new(
            repo.clone(),
            clock.clone(),
            &config.radio.jingle_prefix,
            config.selection.clone(),
        );

        Self {
            config,
            scheduler,
            clock,
            selectors,
            playlists,
            jingles,
            mode_override: None,
            repo,
            cache,
            state,
            storage,
            board: NowPlayingBoard::new(),
        }
    }

    /// Use one strategy for every rule-driven slot
    pub fn with_mode_override(mut self, mode: SelectorMode) -> Self {
        self.mode_override = Some(mode);
        self
    }

    /// Board holding the latest now-playing beacon
    pub fn board(&self) -> NowPlayingBoard {
        self.board.clone()
    }

    pub fn selectors(&self) -> &SelectorRegistry {
        &self.selectors
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    /// Choose the next track and advance the cursor
    ///
    /// Fails only when neither the program's strategy nor the random safety
    /// net can find anything in the music namespace.
    pub fn select_next(&self, cursor: &mut PlayoutCursor) -> SelectorResult<Selection> {
        let slot = self.scheduler.current_slot();

        if let Some(track_id) = cursor.resume.take() {
            match self.repo.get_by_id(track_id) {
                Ok(Some(track)) => {
                    return Ok(self.finish(cursor, &slot, track, TrackKind::Resume, "resume"));
                }
                Ok(None) => {
                    tracing::warn!(track_id, "Resume track no longer exists, selecting normally")
                }
                Err(e) => {
                    tracing::warn!(track_id, error = %e, "Resume lookup failed, selecting normally")
                }
            }
        }

        let interval = self.config.radio.jingle_interval;
        if interval > 0 && cursor.since_jingle >= interval {
            match self.jingles.pick_track(&RuleSet::unrestricted(), None) {
                Ok(track) => {
                    return Ok(self.finish(cursor, &slot, track, TrackKind::Jingle, "station_id"));
                }
                Err(e) => tracing::debug!(
                    prefix = self.jingles.prefix(),
                    error = %e,
                    "No station identification available"
                ),
            }
        }

        let (track, selector) = self.pick_music(&slot, cursor.last_music())?;
        Ok(self.finish(cursor, &slot, track, TrackKind::Music, &selector))
    }

    fn finish(
        &self,
        cursor: &mut PlayoutCursor,
        slot: &ScheduleSlot,
        track: Track,
        kind: TrackKind,
        selector: &str,
    ) -> Selection {
        let selection = Selection {
            track,
            kind,
            program: slot.name.clone(),
            selector: selector.to_string(),
            upcoming: self.lookahead(slot),
        };
        cursor.advance(&selection);
        selection
    }

    fn music_selector(&self, rules: &RuleSet) -> Arc<dyn Selector> {
        match self.mode_override {
            Some(mode) => self.selectors.get(mode),
            None => self.selectors.resolve(&rules.mode),
        }
    }

    fn pick_music(&self, slot: &ScheduleSlot, last: Option<&Track>) -> SelectorResult<(Track, String)> {
        if let Program::Playlist(playlist) = &slot.program {
            match self.playlists.next_track(playlist) {
                Ok(track) => return Ok((track, self.playlists.name().to_string())),
                Err(e) => tracing::warn!(
                    playlist = %playlist.name,
                    error = %e,
                    "Playlist unplayable, using rule selection"
                ),
            }
        }

        let rules = slot.rules();
        let selector = self.music_selector(&rules);
        match selector.pick_track(&rules, last) {
            Ok(track) => Ok((track, selector.name().to_string())),
            Err(e) => {
                tracing::warn!(
                    selector = selector.name(),
                    program = %slot.name,
                    error = %e,
                    "Selector failed, falling back to random"
                );
                metrics::record_selector_fallback(selector.name());

                let fallback = self.selectors.fallback();
                let track = fallback.pick_track(&rules, last)?;
                Ok((track, fallback.name().to_string()))
            }
        }
    }

    fn lookahead(&self, slot: &ScheduleSlot) -> Vec<String> {
        let n = self.config.radio.prefetch_count;
        match &slot.program {
            Program::Playlist(playlist) => self.playlists.peek(playlist, n),
            Program::Rules(rules) => self.music_selector(rules).peek(n),
        }
    }

    // ------------------------------------------------------------------------
    // Producer
    // ------------------------------------------------------------------------

    /// Run one iteration of the producer loop
    ///
    /// Returns `None` when nothing could be selected.
    pub async fn play_one<W>(&self, output: &mut W, cursor: &mut PlayoutCursor) -> Option<Played>
    where
        W: AsyncWrite + Unpin,
    {
        let selection = match self.select_next(cursor) {
            Ok(selection) => selection,
            Err(e) => {
                tracing::warn!(error = %e, "No track available");
                return None;
            }
        };
        let track = selection.track.clone();
        let started_at = self.clock.now();

        if let Err(e) = self.state.update_track(track.id, cursor.sequence) {
            tracing::warn!(track = %track.key, error = %e, "Failed to persist stream state");
        }

        self.prefetch(&track, &selection.upcoming);
        self.announce(&track, &selection.program, started_at);

        tracing::info!(
            kind = %selection.kind,
            track = %track.key,
            artist = %track.artist,
            title = %track.title,
            program = %selection.program,
            selector = %selection.selector,
            "Playing"
        );
        metrics::record_track_played();

        let bytes = match self.stream_track(&track.key, output).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(track = %track.key, error = %e, "Streaming failed, skipping track");
                None
            }
        };

        let recorded = bytes.map(|_| self.record_play(track.id, started_at));

        Some(Played {
            selection,
            bytes,
            recorded,
        })
    }

    /// Keep the current track and the lookahead cached, drop everything else
    fn prefetch(&self, track: &Track, upcoming: &[String]) {
        let mut keep = Vec::with_capacity(upcoming.len() + 1);
        keep.push(track.key.clone());
        keep.extend(
            upcoming
                .iter()
                .filter(|key| **key != track.key)
                .take(self.config.radio.prefetch_count)
                .cloned(),
        );

        self.cache.prefetch(keep.clone());

        let cache = self.cache.clone();
        tokio::spawn(async move {
            let removed = cache.cleanup(&keep).await;
            if removed > 0 {
                tracing::debug!(removed, "Cache cleaned");
            }
        });
    }

    fn announce(&self, track: &Track, program: &str, started_at: chrono::DateTime<chrono::Utc>) {
        let storage = self.storage.clone();
        let board = self.board.clone();
        let beacon = NowPlaying::new(track, program, started_at);
        tokio::spawn(async move {
            if let Err(e) = beacon::publish(&storage, &board, beacon).await {
                tracing::warn!(error = %e, "Failed to publish now-playing beacon");
            }
        });
    }

    fn record_play(&self, track_id: i64, played_at: chrono::DateTime<chrono::Utc>) -> JoinHandle<()> {
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = repo.record_play(track_id, played_at) {
                tracing::warn!(track_id, error = %e, "Failed to record play");
            }
        })
    }

    /// Copy a track's bytes from the cache into the encoder input
    async fn stream_track<W>(&self, key: &str, output: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let path = self.cache.get_local_path(key).await?;
        let mut file = tokio::fs::File::open(&path).await?;
        let bytes = tokio::io::copy(&mut file, output).await?;
        output.flush().await?;
        Ok(bytes)
    }

    /// Loop forever, waiting out an empty library
    pub async fn produce<W>(&self, output: &mut W, mut cursor: PlayoutCursor)
    where
        W: AsyncWrite + Unpin,
    {
        let retry = Duration::from_secs(self.config.radio.empty_library_retry_secs);
        loop {
            if self.play_one(output, &mut cursor).await.is_none() {
                tracing::info!(retry_secs = retry.as_secs(), "Library empty, retrying");
                tokio::time::sleep(retry).await;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Run
    // ------------------------------------------------------------------------

    /// Start the encoder and uploader and produce until shutdown
    ///
    /// Returns an encoder error when the encoder exits on its own.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let run_id = self.clock.now().timestamp();
        let segment_dir = self.config.radio.segment_dir.clone();

        let plan = self
            .state
            .plan_resume(self.config.resume_window(), self.config.resume.sequence_margin)
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Stream state unreadable, starting cold");
                ResumePlan::Cold
            });
        tracing::info!(run_id, plan = %plan, "Starting playout");

        if !plan.is_warm() {
            if let Err(e) = self.state.reset_sequence() {
                tracing::warn!(error = %e, "Failed to reset stream sequence");
            }
        }

        prepare_segment_dir(&segment_dir).await?;

        let command = EncoderCommand::hls(
            &self.config.encoder,
            &segment_dir,
            &self.config.uploader.manifest_name,
            run_id,
            plan.start_sequence(),
        );
        let mut encoder = command.spawn().map_err(spawn_error)?;
        let mut input = encoder
            .take_input()
            .ok_or_else(|| Error::encoder("encoder input pipe unavailable"))?;

        let uploader = SegmentUploader::new(
            self.storage.clone(),
            self.state.clone(),
            &segment_dir,
            &self.config.uploader,
        );
        let uploader_task = tokio::spawn(uploader.run(shutdown.clone()));

        let result = tokio::select! {
            () = self.produce(&mut input, PlayoutCursor::from_plan(&plan)) => Ok(()),
            status = encoder.wait() => match status {
                Ok(status) => Err(Error::encoder(format!("encoder exited: {status}"))),
                Err(e) => Err(Error::encoder(format!("{e:#}"))),
            },
            () = wait_for_shutdown(shutdown) => {
                tracing::info!("Shutdown requested");
                Ok(())
            }
        };

        drop(input);
        if let Err(e) = encoder.kill().await {
            tracing::debug!(error = %e, "Encoder already stopped");
        }

        if result.is_ok() {
            let _ = uploader_task.await;
        } else {
            uploader_task.abort();
        }

        result
    }
}

/// Empty the segment directory so the uploader only sees this run's output
/// A missing or non-executable encoder binary is a configuration problem
fn spawn_error(e: anyhow::Error) -> Error {
    let misconfigured = e
        .root_cause()
        .downcast_ref::<std::io::Error>()
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            )
        });

    if misconfigured {
        Error::config(format!("encoder.binary: {e:#}"))
    } else {
        Error::encoder(format!("{e:#}"))
    }
}

async fn prepare_segment_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
