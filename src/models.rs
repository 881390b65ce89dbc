// Core data structures for the onair playout engine

use chrono::{DateTime, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Name of the built-in program used when no slot matches
pub const FALLBACK_SLOT_NAME: &str = "General Rotation";

/// Name of the unrestricted rule set attached to the fallback slot
pub const UNRESTRICTED_RULESET_NAME: &str = "Unrestricted AutoDJ";

/// A playable audio asset stored in the object store
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Track {
    pub id: i64,
    pub key: String, // Object-store locator, e.g. "music/artist/title.mp3"
    pub title: String,
    pub artist: String,
    pub album: String,
    pub genre: String,
    pub style: String, // Free-text sub-genre tags
    pub year: Option<i32>,
    pub duration: f64, // Seconds
    pub bpm: f64,
    pub musical_key: String, // Tonal center, e.g. "C", "F#"
    pub scale: String,       // "major" or "minor"
    pub danceability: f64,
    pub loudness: f64,
    pub play_count: i64,
    pub last_played: Option<DateTime<Utc>>,
}

impl Track {
    /// Human readable label used in log lines
    pub fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    /// File extension of the object key, including the dot
    pub fn extension(&self) -> &str {
        key_extension(&self.key)
    }
}

/// Extension of an object key, including the dot (empty if none)
pub fn key_extension(key: &str) -> &str {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[idx..],
        _ => "",
    }
}

/// Append-only play log entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayHistory {
    pub id: i64,
    pub track_id: i64,
    pub played_at: DateTime<Utc>,
}

/// Durable playout state used for crash recovery
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamState {
    pub track_id: Option<i64>,
    pub hls_sequence: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Selection constraints for a programming window
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct RuleSet {
    pub id: Option<i64>,
    pub name: String,
    /// Selector mode identifier ("starvation", "harmonic", "random")
    pub mode: String,
    pub genre: Option<String>,
    pub styles: Vec<String>,
    pub min_bpm: Option<f64>,
    pub max_bpm: Option<f64>,
    pub min_year: Option<i32>,
    pub max_year: Option<i32>,
}

impl RuleSet {
    /// Rule set that places no constraint on selection
    pub fn unrestricted() -> Self {
        Self {
            name: UNRESTRICTED_RULESET_NAME.to_string(),
            ..Default::default()
        }
    }

    /// Parse a comma separated style list, dropping empty entries
    pub fn parse_styles(csv: &str) -> Vec<String> {
        csv.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Whether any attribute filter (style, BPM, year) is set
    pub fn has_attribute_filters(&self) -> bool {
        !self.styles.is_empty()
            || self.min_bpm.is_some()
            || self.max_bpm.is_some()
            || self.min_year.is_some()
            || self.max_year.is_some()
    }
}

/// Fixed, ordered track sequence
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Playlist {
    pub id: Option<i64>,
    pub name: String,
    /// Object keys in play order
    pub track_keys: Vec<String>,
}

/// What a slot plays while it is active
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Program {
    /// Rule-driven selection
    Rules(RuleSet),
    /// Fixed playlist, walked in order
    Playlist(Playlist),
}

impl Default for Program {
    fn default() -> Self {
        Self::Rules(RuleSet::unrestricted())
    }
}

/// A programming window in the station calendar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleSlot {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
    /// Inactive slots are never selected
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Recurring weekdays; ignored for one-time slots
    #[serde(default)]
    pub days: Vec<Weekday>,
    /// Exact calendar date for one-time events
    #[serde(default)]
    pub date: Option<NaiveDate>,
    /// Inclusive start, "HH:MM" local time
    pub start: String,
    /// Exclusive end, "HH:MM" local time
    pub end: String,
    #[serde(default)]
    pub program: Program,
}

fn default_active() -> bool {
    true
}

impl ScheduleSlot {
    /// Built-in slot used when nothing else matches
    pub fn fallback() -> Self {
        Self {
            id: None,
            name: FALLBACK_SLOT_NAME.to_string(),
            is_active: true,
            days: Vec::new(),
            date: None,
            start: "00:00".to_string(),
            end: "00:00".to_string(),
            program: Program::default(),
        }
    }

    /// Whether this is the built-in fallback slot
    pub fn is_fallback(&self) -> bool {
        self.id.is_none() && self.name == FALLBACK_SLOT_NAME
    }

    /// Rule set driving selection for this slot
    ///
    /// Playlist slots report an unrestricted rule set so that a selector
    /// can take over once the playlist is exhausted or unplayable.
    pub fn rules(&self) -> RuleSet {
        match &self.program {
            Program::Rules(rules) => rules.clone(),
            Program::Playlist(_) => RuleSet::unrestricted(),
        }
    }
}

/// Parse a "Mon,Tue,Fri" weekday list, skipping unknown codes
pub fn parse_days(csv: &str) -> Vec<Weekday> {
    csv.split(',')
        .filter_map(|d| d.trim().parse::<Weekday>().ok())
        .collect()
}

/// Render weekdays as a "Mon,Tue" list
pub fn format_days(days: &[Weekday]) -> String {
    days.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Document published on every track start
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NowPlaying {
    pub artist: String,
    pub title: String,
    pub album: String,
    pub show: String,
    /// Unix seconds
    pub started_at: i64,
}

impl NowPlaying {
    /// Build the beacon for a track starting under a program
    pub fn new(track: &Track, show: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            artist: track.artist.clone(),
            title: track.title.clone(),
            album: track.album.clone(),
            show: show.to_string(),
            started_at: started_at.timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_extension() {
        assert_eq!(key_extension("music/a/b.mp3"), ".mp3");
        assert_eq!(key_extension("music/a.b/track"), "");
        assert_eq!(key_extension("music/.hidden"), "");
        assert_eq!(key_extension("plain.flac"), ".flac");
    }

    #[test]
    fn test_parse_styles_trims_and_drops_empty() {
        assert_eq!(
            RuleSet::parse_styles(" Techno, ,Minimal ,"),
            vec!["Techno".to_string(), "Minimal".to_string()]
        );
        assert!(RuleSet::parse_styles("").is_empty());
    }

    #[test]
    fn test_parse_days() {
        let days = parse_days("Mon, Wed,Funday,Sun");
        assert_eq!(days, vec![Weekday::Mon, Weekday::Wed, Weekday::Sun]);
        assert_eq!(format_days(&days), "Mon,Wed,Sun");
    }

    #[test]
    fn test_fallback_slot() {
        let slot = ScheduleSlot::fallback();
        assert!(slot.is_fallback());
        assert_eq!(slot.rules().name, UNRESTRICTED_RULESET_NAME);
        assert!(!slot.rules().has_attribute_filters());
    }

    #[test]
    fn test_now_playing_from_track() {
        let track = Track {
            artist: "Artist".into(),
            title: "Title".into(),
            album: "Album".into(),
            ..Default::default()
        };
        let started = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let beacon = NowPlaying::new(&track, "Morning Show", started);
        let json = serde_json::to_value(&beacon).unwrap();
        assert_eq!(json["show"], "Morning Show");
        assert_eq!(json["started_at"], 1_700_000_000);
    }
}
