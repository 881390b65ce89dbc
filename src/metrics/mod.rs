//! Prometheus metrics for the playout engine
//!
//! This module provides metrics tracking for:
//! - Playout: tracks aired, selector fallbacks, cache hits and misses
//! - Uploader: uploads per artifact type and their duration, HLS sequence
//!
//! # Usage
//!
//! Call `init_metrics()` at application startup to register all metrics.
//! If initialization fails, metrics operations become no-ops.

use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for producer-side metrics
struct PlayoutMetrics {
    tracks_played: Counter,
    selector_fallbacks: CounterVec,
    cache_requests: CounterVec,
}

/// Container for uploader metrics
struct UploadMetrics {
    uploads: CounterVec,
    upload_duration: HistogramVec,
    hls_sequence: Gauge,
}

static PLAYOUT_METRICS: OnceLock<PlayoutMetrics> = OnceLock::new();

static UPLOAD_METRICS: OnceLock<UploadMetrics> = OnceLock::new();

/// Flag to track if initialization was attempted
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Initialize all Prometheus metrics
///
/// This function should be called once at application startup.
/// If metric registration fails, subsequent metric operations become
/// no-ops.
///
/// # Example
///
/// ```ignore
/// if let Err(e) = onair::metrics::init_metrics() {
///     tracing::warn!("Metrics initialization failed: {}", e);
///     // Playout continues without metrics
/// }
/// ```
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    // Prevent double initialization
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let playout = PlayoutMetrics {
        tracks_played: register_counter!(
            "onair_tracks_played_total",
            "Total number of tracks streamed to the encoder"
        )?,
        selector_fallbacks: register_counter_vec!(
            "onair_selector_fallbacks_total",
            "Selections served by the safety-net selector, by failing strategy",
            &["from"]
        )?,
        cache_requests: register_counter_vec!(
            "onair_cache_requests_total",
            "Track cache lookups by result (hit, miss, shared)",
            &["result"]
        )?,
    };

    let upload = UploadMetrics {
        uploads: register_counter_vec!(
            "onair_uploads_total",
            "Total stream artifacts uploaded by type",
            &["type"]
        )?,
        upload_duration: register_histogram_vec!(
            "onair_upload_duration_seconds",
            "Upload duration in seconds by artifact type",
            &["type"],
            vec![0.1, 0.5, 1.0, 2.0, 5.0]
        )?,
        hls_sequence: register_gauge!(
            "onair_hls_sequence",
            "Index of the most recently uploaded segment"
        )?,
    };

    PLAYOUT_METRICS
        .set(playout)
        .map_err(|_| "Playout metrics already initialized")?;
    UPLOAD_METRICS
        .set(upload)
        .map_err(|_| "Upload metrics already initialized")?;

    tracing::info!("Prometheus metrics initialized successfully");
    Ok(())
}

/// Check if metrics have been initialized
pub fn metrics_initialized() -> bool {
    PLAYOUT_METRICS.get().is_some() && UPLOAD_METRICS.get().is_some()
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a track handed to the encoder
pub fn record_track_played() {
    if let Some(m) = PLAYOUT_METRICS.get() {
        m.tracks_played.inc();
    }
}

/// Record a selection served by the fallback selector
pub fn record_selector_fallback(from: &str) {
    if let Some(m) = PLAYOUT_METRICS.get() {
        m.selector_fallbacks.with_label_values(&[from]).inc();
    }
}

/// Record a cache lookup outcome
pub fn record_cache_request(result: &str) {
    if let Some(m) = PLAYOUT_METRICS.get() {
        m.cache_requests.with_label_values(&[result]).inc();
    }
}

/// Record a completed upload
pub fn record_upload(kind: &str) {
    if let Some(m) = UPLOAD_METRICS.get() {
        m.uploads.with_label_values(&[kind]).inc();
    }
}

/// Update the last uploaded segment index
pub fn set_hls_sequence(sequence: u64) {
    if let Some(m) = UPLOAD_METRICS.get() {
        m.hls_sequence.set(sequence as f64);
    }
}

/// Histogram timer guard that records duration on drop
pub struct MetricsTimer {
    timer: Option<prometheus::HistogramTimer>,
}

impl MetricsTimer {
    fn new(timer: prometheus::HistogramTimer) -> Self {
        Self { timer: Some(timer) }
    }

    /// Create a no-op timer when metrics are not initialized
    fn noop() -> Self {
        Self { timer: None }
    }

    /// Drop the measurement, e.g. for a failed upload
    pub fn discard(mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_discard();
        }
    }
}

impl Drop for MetricsTimer {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop_and_record();
        }
    }
}

/// Start an upload timer for an artifact type
pub fn start_upload_timer(kind: &str) -> MetricsTimer {
    match UPLOAD_METRICS.get() {
        Some(m) => MetricsTimer::new(m.upload_duration.with_label_values(&[kind]).start_timer()),
        None => MetricsTimer::noop(),
    }
}

// ============================================================================
// Tests
// ============================================================================
