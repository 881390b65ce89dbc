//! Fixed-order playback for playlist slots

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{SelectorError, SelectorResult};
use crate::models::{Playlist, Track};
use crate::storage::TrackRepository;

#[derive(Default)]
struct Cursor {
    /// Identity of the playlist the cursor walks
    playlist: Option<(Option<i64>, String)>,
    position: usize,
}

/// Walks a playlist in order, wrapping at the end
///
/// Keys that are unknown to the repository or outside the namespace are
/// skipped. The cursor restarts whenever a different playlist comes on air.
pub struct PlaylistSelector {
    repo: Arc<dyn TrackRepository>,
    prefix: String,
    cursor: Mutex<Cursor>,
}

impl PlaylistSelector {
    pub fn new(repo: Arc<dyn TrackRepository>, prefix: &str) -> Self {
        Self {
            repo,
            prefix: prefix.to_string(),
            cursor: Mutex::new(Cursor::default()),
        }
    }

    pub fn name(&self) -> &str {
        "playlist"
    }

    fn cursor(&self, playlist: &Playlist) -> MutexGuard<'_, Cursor> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let identity = (playlist.id, playlist.name.clone());
        if cursor.playlist.as_ref() != Some(&identity) {
            cursor.playlist = Some(identity);
            cursor.position = 0;
        }
        cursor
    }

    /// Next playable track of `playlist`
    pub fn next_track(&self, playlist: &Playlist) -> SelectorResult<Track> {
        let len = playlist.track_keys.len();
        let mut cursor = self.cursor(playlist);

        for _ in 0..len {
            let key = &playlist.track_keys[cursor.position % len];
            cursor.position = (cursor.position + 1) % len;

            if !key.starts_with(&self.prefix) {
                tracing::warn!(
                    playlist = %playlist.name,
                    key = %key,
                    "Playlist entry outside namespace, skipping"
                );
                continue;
            }

            match self.repo.get_by_key(key)? {
                Some(track) => return Ok(track),
                None => tracing::warn!(
                    playlist = %playlist.name,
                    key = %key,
                    "Playlist entry not in library, skipping"
                ),
            }
        }

        Err(SelectorError::no_candidates(format!("playlist {}", playlist.name)))
    }

    /// Keys following the cursor, in play order
    pub fn peek(&self, playlist: &Playlist, n: usize) -> Vec<String> {
        let len = playlist.track_keys.len();
        if len == 0 {
            return Vec::new();
        }

        let cursor = self.cursor(playlist);
        (0..n.min(len))
            .map(|i| playlist.track_keys[(cursor.position + i) % len].clone())
            .filter(|key| key.starts_with(&self.prefix))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Database, SqliteTrackRepository};

    fn repo_with(keys: &[&str]) -> Arc<SqliteTrackRepository> {
        let repo = Arc::new(SqliteTrackRepository::new(Database::in_memory().unwrap()));
        for key in keys {
            repo.upsert_track(&Track {
                key: key.to_string(),
                ..Default::default()
            })
            .unwrap();
        }
        repo
    }

    fn playlist(name: &str, keys: &[&str]) -> Playlist {
        Playlist {
            id: None,
            name: name.to_string(),
            track_keys: keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn test_walks_in_order_and_wraps() {
        let repo = repo_with(&["music/1.mp3", "music/2.mp3"]);
        let selector = PlaylistSelector::new(repo, "music/");
        let list = playlist("Set", &["music/1.mp3", "music/2.mp3"]);

        let keys: Vec<_> = (0..3)
            .map(|_| selector.next_track(&list).unwrap().key)
            .collect();
        assert_eq!(keys, vec!["music/1.mp3", "music/2.mp3", "music/1.mp3"]);
        assert_eq!(selector.peek(&list, 5), vec!["music/2.mp3", "music/1.mp3"]);
    }

    #[test]
    fn test_skips_missing_and_foreign_keys() {
        let repo = repo_with(&["music/ok.mp3", "station_id/id.mp3"]);
        let selector = PlaylistSelector::new(repo, "music/");
        let list = playlist("Mixed", &["music/gone.mp3", "station_id/id.mp3", "music/ok.mp3"]);

        assert_eq!(selector.next_track(&list).unwrap().key, "music/ok.mp3");
        assert_eq!(selector.next_track(&list).unwrap().key, "music/ok.mp3");
    }

    #[test]
    fn test_empty_or_unplayable_playlist_fails() {
        let repo = repo_with(&[]);
        let selector = PlaylistSelector::new(repo, "music/");

        assert!(selector.next_track(&playlist("Empty", &[])).is_err());
        assert!(selector.next_track(&playlist("Ghost", &["music/x.mp3"])).is_err());
    }

    #[test]
    fn test_cursor_resets_on_new_playlist() {
        let repo = repo_with(&["music/a.mp3", "music/b.mp3"]);
        let selector = PlaylistSelector::new(repo, "music/");
        let first = playlist("First", &["music/a.mp3", "music/b.mp3"]);
        let second = playlist("Second", &["music/b.mp3", "music/a.mp3"]);

        selector.next_track(&first).unwrap();
        assert_eq!(selector.next_track(&second).unwrap().key, "music/b.mp3");
    }
}
