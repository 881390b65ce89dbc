use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Local};

use onair::config::Config;
use onair::scheduler::{Clock, FixedClock};
use onair::selector::{CamelotKey, SelectorMode};
use onair::streaming::PlayoutCursor;

use super::Station;

/// Airtime assumed for tracks without a known duration
const DEFAULT_DURATION_SECS: f64 = 180.0;

pub fn simulate(config: Config, count: usize, mode: Option<String>) -> Result<()> {
    let mode = mode
        .as_deref()
        .map(SelectorMode::from_str)
        .transpose()
        .context("Invalid --mode")?;

    // FixedClock reports its UTC wall clock as local time
    let clock = Arc::new(FixedClock::new(Local::now().naive_local().and_utc()));
    let station = Station::open(config, clock.clone())?;
    let mut engine = station.engine()?;
    if let Some(mode) = mode {
        engine = engine.with_mode_override(mode);
    }

    println!("Playout Simulation");
    println!("==================");
    println!(
        "  Mode: {}",
        mode.map_or_else(|| "per program".to_string(), |m| m.to_string())
    );
    println!("  Tracks: {count}");
    println!();
    println!(
        "{:<6} {:<7} {:<24} {:<32} {:>6} {:>4}  {}",
        "TIME", "TYPE", "ARTIST", "TITLE", "BPM", "KEY", "PROGRAM"
    );

    let mut cursor = PlayoutCursor::new();
    for _ in 0..count {
        let selection = match engine.select_next(&mut cursor) {
            Ok(selection) => selection,
            Err(e) => {
                println!("\nSelection stopped: {e}");
                break;
            }
        };
        let track = &selection.track;

        let key = CamelotKey::of(track).map_or_else(|| "-".to_string(), |k| k.to_string());
        println!(
            "{:<6} {:<7} {:<24} {:<32} {:>6.1} {:>4}  {}",
            clock.now_local().format("%H:%M"),
            selection.kind.as_str(),
            truncate(&track.artist, 24),
            truncate(&track.title, 32),
            track.bpm,
            key,
            selection.program,
        );

        let secs = if track.duration > 0.0 {
            track.duration
        } else {
            DEFAULT_DURATION_SECS
        };
        clock.advance(Duration::milliseconds((secs * 1000.0) as i64));
    }

    Ok(())
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let mut out: String = value.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}
