//! Camelot wheel and mix scoring
//!
//! Each of the 24 major/minor keys sits on a 12-position wheel with a
//! letter: `B` for major, `A` for minor. Two keys mix cleanly when they
//! share a position, or sit on adjacent positions with the same letter.
//!
//! ```text
//!        12B  1B  2B
//!    11B             3B        8A <-> 8B   relative major/minor
//!   10B    (wheel)    4B       8B <-> 9B   one step clockwise
//!    9B              5B        1B <-> 12B  wraps around
//!        8B   7B  6B
//! ```

use std::fmt;

use crate::models::Track;

/// BPM change ratio above which a transition counts as a jump
pub const BPM_JUMP_RATIO: f64 = 0.06;
pub const BPM_JUMP_PENALTY: f64 = 100.0;
pub const BPM_DRIFT_WEIGHT: f64 = 20.0;
pub const HARMONIC_BONUS: f64 = 20.0;
pub const ENERGY_JUMP_THRESHOLD: f64 = 0.8;
pub const ENERGY_JUMP_PENALTY: f64 = 40.0;

/// Wheel half: minor keys are `A`, major keys are `B`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CamelotLetter {
    A,
    B,
}

/// A position on the Camelot wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CamelotKey {
    /// 1 through 12
    pub number: u8,
    pub letter: CamelotLetter,
}

impl CamelotKey {
    /// Map a tonal center and scale onto the wheel
    ///
    /// Accepts sharps and flats in any letter case ("ab", "G#", "EB") and
    /// "major"/"minor" scales. Anything else is `None`.
    pub fn from_key(key: &str, scale: &str) -> Option<Self> {
        let note = normalize_note(key)?;
        let letter = match scale.trim().to_ascii_lowercase().as_str() {
            "major" => CamelotLetter::B,
            "minor" => CamelotLetter::A,
            _ => return None,
        };

        let number = match (letter, note.as_str()) {
            (CamelotLetter::B, "B") => 1,
            (CamelotLetter::B, "F#" | "Gb") => 2,
            (CamelotLetter::B, "Db" | "C#") => 3,
            (CamelotLetter::B, "Ab" | "G#") => 4,
            (CamelotLetter::B, "Eb" | "D#") => 5,
            (CamelotLetter::B, "Bb" | "A#") => 6,
            (CamelotLetter::B, "F") => 7,
            (CamelotLetter::B, "C") => 8,
            (CamelotLetter::B, "G") => 9,
            (CamelotLetter::B, "D") => 10,
            (CamelotLetter::B, "A") => 11,
            (CamelotLetter::B, "E") => 12,

            (CamelotLetter::A, "Ab" | "G#") => 1,
            (CamelotLetter::A, "Eb" | "D#") => 2,
            (CamelotLetter::A, "Bb" | "A#") => 3,
            (CamelotLetter::A, "F") => 4,
            (CamelotLetter::A, "C") => 5,
            (CamelotLetter::A, "G") => 6,
            (CamelotLetter::A, "D") => 7,
            (CamelotLetter::A, "A") => 8,
            (CamelotLetter::A, "E") => 9,
            (CamelotLetter::A, "B") => 10,
            (CamelotLetter::A, "F#" | "Gb") => 11,
            (CamelotLetter::A, "Db" | "C#") => 12,

            _ => return None,
        };

        Some(Self { number, letter })
    }

    /// Wheel position of a track, if its key is known
    pub fn of(track: &Track) -> Option<Self> {
        Self::from_key(&track.musical_key, &track.scale)
    }

    /// Whether a transition between the two keys is harmonic
    pub fn is_compatible(&self, other: &Self) -> bool {
        if self.number == other.number {
            return true;
        }

        let diff = self.number.abs_diff(other.number);
        self.letter == other.letter && (diff == 1 || diff == 11)
    }
}

impl fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self.letter {
            CamelotLetter::A => 'A',
            CamelotLetter::B => 'B',
        };
        write!(f, "{}{}", self.number, letter)
    }
}

/// "ab" -> "Ab", "f#" -> "F#", "EB" -> "Eb"
fn normalize_note(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let mut chars = raw.chars();
    let first = chars.next()?;
    if !('a'..='g').contains(&first.to_ascii_lowercase()) {
        return None;
    }

    let mut note = first.to_ascii_uppercase().to_string();
    note.extend(chars.map(|c| c.to_ascii_lowercase()));
    Some(note)
}

/// Camelot compatibility of two (key, scale) pairs; unknown keys never match
pub fn are_keys_compatible(key1: &str, scale1: &str, key2: &str, scale2: &str) -> bool {
    match (
        CamelotKey::from_key(key1, scale1),
        CamelotKey::from_key(key2, scale2),
    ) {
        (Some(a), Some(b)) => a.is_compatible(&b),
        _ => false,
    }
}

/// How well `next` follows `prev`; lower is better, negative is a bonus
///
/// A track without a BPM contributes no tempo term.
pub fn mix_score(prev: &Track, next: &Track) -> f64 {
    let mut score = 0.0;

    if prev.bpm > 0.0 && next.bpm > 0.0 {
        let ratio = (prev.bpm - next.bpm).abs() / prev.bpm;
        if ratio > BPM_JUMP_RATIO {
            score += BPM_JUMP_PENALTY;
        } else {
            score += ratio * BPM_DRIFT_WEIGHT;
        }
    }

    if are_keys_compatible(&prev.musical_key, &prev.scale, &next.musical_key, &next.scale) {
        score -= HARMONIC_BONUS;
    }

    if (prev.danceability - next.danceability).abs() > ENERGY_JUMP_THRESHOLD {
        score += ENERGY_JUMP_PENALTY;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    const MAJOR: [&str; 12] = ["C", "Db", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B"];
    const MINOR: [&str; 12] = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "Bb", "B"];

    fn track(bpm: f64, key: &str, scale: &str, danceability: f64) -> Track {
        Track {
            bpm,
            musical_key: key.to_string(),
            scale: scale.to_string(),
            danceability,
            ..Default::default()
        }
    }

    #[test]
    fn test_table_covers_all_24_positions() {
        let mut seen = HashSet::new();
        for note in MAJOR {
            seen.insert(CamelotKey::from_key(note, "major").unwrap());
        }
        for note in MINOR {
            seen.insert(CamelotKey::from_key(note, "minor").unwrap());
        }
        assert_eq!(seen.len(), 24);
    }

    #[test]
    fn test_known_positions() {
        assert_eq!(CamelotKey::from_key("C", "major").unwrap().to_string(), "8B");
        assert_eq!(CamelotKey::from_key("A", "minor").unwrap().to_string(), "8A");
        assert_eq!(CamelotKey::from_key("ab", "MINOR").unwrap().to_string(), "1A");
        assert_eq!(CamelotKey::from_key(" G# ", "minor").unwrap().to_string(), "1A");
        assert_eq!(CamelotKey::from_key("E", "major").unwrap().to_string(), "12B");
        assert!(CamelotKey::from_key("H", "major").is_none());
        assert!(CamelotKey::from_key("C", "dorian").is_none());
        assert!(CamelotKey::from_key("", "major").is_none());
    }

    #[test]
    fn test_compatibility_rules() {
        // same position
        assert!(are_keys_compatible("C", "major", "C", "major"));
        // relative minor
        assert!(are_keys_compatible("C", "major", "A", "minor"));
        // adjacent, same letter
        assert!(are_keys_compatible("C", "major", "G", "major"));
        assert!(are_keys_compatible("C", "major", "F", "major"));
        // 12B -> 1B wraps
        assert!(are_keys_compatible("E", "major", "B", "major"));
        // adjacent but letter differs
        assert!(!are_keys_compatible("C", "major", "E", "minor"));
        // two steps
        assert!(!are_keys_compatible("C", "major", "D", "major"));
        // unknown key
        assert!(!are_keys_compatible("", "", "C", "major"));
    }

    #[test]
    fn test_mix_score_terms() {
        let prev = track(128.0, "C", "major", 0.7);

        // 1.56% drift, compatible key, same energy
        let smooth = mix_score(&prev, &track(130.0, "G", "major", 0.7));
        assert!((smooth - (2.0 / 128.0 * 20.0 - 20.0)).abs() < 1e-9);

        // >6% jump
        let jump = mix_score(&prev, &track(140.0, "D", "major", 0.7));
        assert_eq!(jump, 100.0);

        // energy cliff
        let cliff = mix_score(&track(128.0, "C", "major", 0.95), &track(128.0, "D", "major", 0.1));
        assert_eq!(cliff, 40.0);

        // unknown tempo is neutral
        assert_eq!(mix_score(&track(0.0, "", "", 0.5), &track(120.0, "", "", 0.5)), 0.0);
    }

    fn any_key() -> impl Strategy<Value = CamelotKey> {
        (1u8..=12, any::<bool>()).prop_map(|(number, major)| CamelotKey {
            number,
            letter: if major { CamelotLetter::B } else { CamelotLetter::A },
        })
    }

    proptest! {
        #[test]
        fn prop_compatibility_is_reflexive(key in any_key()) {
            prop_assert!(key.is_compatible(&key));
        }

        #[test]
        fn prop_compatibility_is_symmetric(a in any_key(), b in any_key()) {
            prop_assert_eq!(a.is_compatible(&b), b.is_compatible(&a));
        }

        #[test]
        fn prop_each_key_has_three_neighbours(key in any_key()) {
            let others = (1u8..=12)
                .flat_map(|number| [CamelotLetter::A, CamelotLetter::B].map(|letter| CamelotKey { number, letter }))
                .filter(|other| *other != key && key.is_compatible(other))
                .count();
            // relative key plus one step either way
            prop_assert_eq!(others, 3);
        }
    }
}
