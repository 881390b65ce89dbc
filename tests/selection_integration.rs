//! Integration tests for track selection
//!
//! These tests verify, against a file-backed station database:
//! - Rule filters keep out-of-program tracks away from every strategy
//! - The exclusion window holds unless relaxation is reported
//! - Harmonic chaining prefers compatible neighbours
//! - Mode dispatch is total

mod common;

use std::collections::HashSet;

use chrono::Duration;
use common::{styled_track, track, TestStation};
use onair::config::SelectionConfig;
use onair::models::{RuleSet, Track};
use onair::scheduler::Clock;
use onair::selector::{
    HarmonicSelector, RelaxationTier, Selector, SelectorMode, SelectorRegistry, StarvationSelector,
};
use onair::storage::TrackRepository;

fn techno_rules() -> RuleSet {
    RuleSet {
        name: "Peak Time".to_string(),
        styles: vec!["Techno".to_string()],
        min_bpm: Some(120.0),
        max_bpm: Some(140.0),
        ..Default::default()
    }
}

/// 15 techno tracks at 130 BPM and one ambient track at 90 BPM
fn seed_techno(station: &TestStation) -> i64 {
    for i in 0..15 {
        station.add_track(styled_track(
            &format!("music/techno/{i:02}.mp3"),
            &format!("Techno Artist {i}"),
            "Techno",
            130.0,
        ));
    }
    station.add_track(styled_track("music/ambient/drift.mp3", "Ambient Artist", "Ambient", 90.0))
}

// ============================================================================
// Rule Filters
// ============================================================================

#[test]
fn test_starvation_queue_respects_rules() {
    let station = TestStation::new();
    let ambient = seed_techno(&station);

    let selector = StarvationSelector::with_seed(
        station.repo.clone(),
        station.clock.clone(),
        "music/",
        SelectionConfig::default(),
        7,
    );

    let first = selector.pick_track(&techno_rules(), None).unwrap();
    assert_ne!(first.id, ambient);
    assert_eq!(selector.relaxation(), RelaxationTier::Strict);

    let queued = selector.peek(50);
    assert_eq!(queued.len(), 14);
    assert!(queued.iter().all(|key| key.starts_with("music/techno/")));
}

#[test]
fn test_harmonic_chain_respects_rules() {
    let station = TestStation::new();
    let ambient = seed_techno(&station);

    let selector = HarmonicSelector::with_seed(
        station.repo.clone(),
        station.clock.clone(),
        "music/",
        SelectionConfig::default(),
        11,
    );

    let mut last: Option<Track> = None;
    for _ in 0..20 {
        let pick = selector.pick_track(&techno_rules(), last.as_ref()).unwrap();
        assert_ne!(pick.id, ambient);
        if let Some(prev) = &last {
            assert_ne!(pick.artist, prev.artist);
        }
        last = Some(pick);
    }
}

// ============================================================================
// Exclusion Window
// ============================================================================

#[test]
fn test_recent_plays_are_excluded() {
    let station = TestStation::new();
    for i in 0..12 {
        station.add_track(track(&format!("music/{i:02}.mp3"), &format!("Artist {i}")));
    }

    // Six tracks aired within the last 12 hours
    let now = station.clock.now();
    for id in 1..=6 {
        station.repo.record_play(id, now - Duration::hours(id)).unwrap();
    }

    let settings = SelectionConfig {
        artist_separation: 0,
        ..Default::default()
    };
    let selector = StarvationSelector::with_seed(
        station.repo.clone(),
        station.clock.clone(),
        "music/",
        settings,
        3,
    );

    let pick = selector.pick_track(&RuleSet::unrestricted(), None).unwrap();
    assert_eq!(selector.relaxation(), RelaxationTier::Strict);

    let mut seen: HashSet<String> = selector.peek(50).into_iter().collect();
    seen.insert(pick.key);
    assert_eq!(seen.len(), 6);

    let window = SelectionConfig::default().exclusion_window();
    for key in seen {
        let track = station.repo.get_by_key(&key).unwrap().unwrap();
        assert!(track.last_played.map_or(true, |t| now - t >= window));
    }
}

#[test]
fn test_exhausted_window_relaxes_observably() {
    let station = TestStation::new();
    for i in 0..3 {
        station.add_track(track(&format!("music/{i}.mp3"), &format!("Artist {i}")));
    }
    let now = station.clock.now();
    for id in 1..=3 {
        station.repo.record_play(id, now - Duration::minutes(10 * id)).unwrap();
    }

    let selector = StarvationSelector::new(
        station.repo.clone(),
        station.clock.clone(),
        "music/",
        SelectionConfig::default(),
    );

    // Everything aired recently: the loop must still get a track
    let pick = selector.pick_track(&RuleSet::unrestricted(), None).unwrap();
    assert!(pick.key.starts_with("music/"));
    assert_eq!(selector.relaxation(), RelaxationTier::OldestInNamespace);
}

#[test]
fn test_namespace_boundary_is_never_crossed() {
    let station = TestStation::new();
    station.add_track(track("station_id/id.mp3", "Station"));

    let registry = SelectorRegistry::new(
        station.repo.clone(),
        station.clock.clone(),
        "music/",
        SelectionConfig::default(),
        SelectorMode::Starvation,
    );

    for mode in SelectorMode::all() {
        assert!(registry.get(mode).pick_track(&RuleSet::unrestricted(), None).is_err());
    }
}

// ============================================================================
// Harmonic Chaining
// ============================================================================

#[test]
fn test_harmonic_prefers_compatible_neighbour() {
    let station = TestStation::new();
    let anchor = Track {
        id: 0,
        bpm: 120.0,
        musical_key: "C".to_string(),
        scale: "major".to_string(),
        danceability: 0.5,
        ..track("music/anchor.mp3", "Anchor")
    };
    let good = station.add_track(Track {
        bpm: 121.0,
        musical_key: "G".to_string(),
        scale: "major".to_string(),
        danceability: 0.5,
        ..track("music/good.mp3", "Good")
    });
    for (i, key) in ["F#", "C#", "G#", "D#", "A#"].iter().enumerate() {
        station.add_track(Track {
            bpm: 150.0,
            musical_key: key.to_string(),
            scale: "major".to_string(),
            danceability: 0.5,
            ..track(&format!("music/clash{i}.mp3"), &format!("Clash {i}"))
        });
    }

    let selector = HarmonicSelector::with_seed(
        station.repo.clone(),
        station.clock.clone(),
        "music/",
        SelectionConfig::default(),
        5,
    );

    for _ in 0..5 {
        let pick = selector.pick_track(&RuleSet::unrestricted(), Some(&anchor)).unwrap();
        assert_eq!(pick.id, good);
    }
}

// ============================================================================
// Mode Dispatch
// ============================================================================

#[test]
fn test_every_mode_string_maps_to_a_selector() {
    let station = TestStation::new();
    station.add_track(track("music/a.mp3", "A"));

    let registry = SelectorRegistry::new(
        station.repo.clone(),
        station.clock.clone(),
        "music/",
        SelectionConfig::default(),
        SelectorMode::Random,
    );

    for mode in ["starvation", "HARMONIC", " random ", "", "disco-mode"] {
        let selector = registry.resolve(mode);
        assert!(selector.pick_track(&RuleSet::unrestricted(), None).is_ok());
    }
    assert_eq!(registry.resolve_mode("disco-mode"), SelectorMode::Random);
    assert_eq!(registry.resolve_mode("harmonic"), SelectorMode::Harmonic);
}
