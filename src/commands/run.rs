use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;

use onair::config::Config;
use onair::error::OnAirErrorTrait;
use onair::metrics;
use onair::scheduler::SystemClock;
use onair::server::{self, AppState};
use onair::storage::TrackRepository;

use super::Station;

/// Delay before an interrupted run is restarted
const RESTART_DELAY: Duration = Duration::from_secs(2);

/// Timetable file re-read interval
const TIMETABLE_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(config: Config) -> Result<()> {
    if let Err(e) = metrics::init_metrics() {
        tracing::warn!("Metrics initialization failed: {}", e);
    }

    let station = Station::open(config, Arc::new(SystemClock))?;
    let config = station.config.clone();

    let tracks = station.repo.count(&config.radio.music_prefix)?;
    tracing::info!(prefix = %config.radio.music_prefix, tracks, "Library loaded");
    match station.storage.library_has(&config.radio.music_prefix).await {
        Ok(true) => {}
        Ok(false) => tracing::warn!(
            prefix = %config.radio.music_prefix,
            "No audio objects under music prefix"
        ),
        Err(e) => tracing::warn!(error = %e, "Object store unavailable"),
    }

    let (shutdown_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::error!("Failed to wait for Ctrl+C: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    if let Some(timetable) = station.timetable.clone() {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(TIMETABLE_RELOAD_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Err(e) = timetable.reload() {
                    tracing::warn!(error = %e, "Timetable reload failed, keeping previous slots");
                }
            }
        });
    }

    let engine = station.engine()?;

    let server_task = match &config.server.bind_address {
        Some(bind) => {
            let addr: SocketAddr = bind
                .parse()
                .with_context(|| format!("Invalid bind address '{bind}'"))?;
            let state = AppState::new(
                engine.board(),
                &config.server.public_base_url,
                &config.uploader.manifest_name,
            );
            let mut rx = shutdown.clone();
            Some(tokio::spawn(server::serve(addr, state, async move {
                let _ = rx.wait_for(|stop| *stop).await;
            })))
        }
        None => None,
    };

    loop {
        match engine.run(shutdown.clone()).await {
            Ok(()) => break,
            Err(e) if e.is_recoverable() && !*shutdown.borrow() => {
                tracing::error!(
                    category = e.category().as_str(),
                    error = %e,
                    "Playout interrupted, restarting"
                );
                tokio::time::sleep(RESTART_DELAY).await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(task) = server_task {
        task.await.context("Helper server task failed")??;
    }

    tracing::info!("Playout stopped");
    Ok(())
}
