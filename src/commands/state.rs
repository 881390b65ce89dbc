use std::sync::Arc;

use anyhow::Result;

use onair::config::Config;
use onair::scheduler::SystemClock;
use onair::storage::TrackRepository;

use super::Station;

pub fn state(config: Config) -> Result<()> {
    let station = Station::open(config, Arc::new(SystemClock))?;
    let manager = station.state_manager()?;

    let current = manager.get_current_state()?;
    let plan = manager.plan_resume(
        station.config.resume_window(),
        station.config.resume.sequence_margin,
    )?;

    let track = match current.track_id {
        Some(id) => station.repo.get_by_id(id)?,
        None => None,
    };

    println!("Stream State");
    println!("============");
    match (&current.track_id, &track) {
        (Some(_), Some(track)) => println!("  Track: {} ({})", track.label(), track.key),
        (Some(id), None) => println!("  Track: {id} (no longer in library)"),
        (None, _) => println!("  Track: -"),
    }
    println!("  HLS sequence: {}", current.hls_sequence);
    println!(
        "  Started at: {}",
        current.started_at.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
    );
    println!(
        "  Updated at: {}",
        current.updated_at.map_or_else(|| "-".to_string(), |t| t.to_rfc3339())
    );
    println!();
    println!("Restarting now would be a {plan}.");

    Ok(())
}
