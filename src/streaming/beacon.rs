//! Now-playing beacon
//!
//! Every track start publishes a small JSON document to the stream bucket
//! and keeps the latest copy in memory for the helper server.

use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context, Result};

use crate::models::NowPlaying;
use crate::storage::StorageClient;

/// Object key of the beacon in the stream bucket
pub const NOW_PLAYING_KEY: &str = "now_playing.json";

const CONTENT_TYPE: &str = "application/json";
const CACHE_CONTROL: &str = "max-age=0, no-cache";

/// Latest beacon, shared between the producer and the helper server
#[derive(Clone, Default)]
pub struct NowPlayingBoard {
    current: Arc<RwLock<Option<NowPlaying>>>,
}

impl NowPlayingBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<NowPlaying> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set(&self, beacon: NowPlaying) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(beacon);
    }
}

/// Record the beacon locally and upload it
pub async fn publish(
    storage: &StorageClient,
    board: &NowPlayingBoard,
    beacon: NowPlaying,
) -> Result<()> {
    let body = serde_json::to_vec(&beacon).context("Failed to encode now-playing beacon")?;
    board.set(beacon);

    storage
        .publish_bytes(NOW_PLAYING_KEY, body, CONTENT_TYPE, CACHE_CONTROL)
        .await
        .context("Failed to upload now-playing beacon")
}
