//! Prometheus metrics for harvest passes and batches
//!
//! Tracked: pass outcome and duration, links collected, per-candidate
//! extraction outcome, browser launches by profile, batch rounds and cooldowns.
//!
//! Register once with [`init_metrics`]. Until registration succeeds every
//! `record_*` call does nothing.

use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};
use std::sync::OnceLock;

// ============================================================================
// Metrics Storage
// ============================================================================

/// Container for all harvest metrics
struct HarvestMetrics {
    passes: CounterVec,
    pass_duration: HistogramVec,
    candidates: CounterVec,
    links_collected: Counter,
    sessions: CounterVec,
    batch_rounds: Counter,
    batch_cooldowns: Counter,
}

/// Global storage for harvest metrics
static HARVEST_METRICS: OnceLock<HarvestMetrics> = OnceLock::new();

/// Set on the first registration attempt
static METRICS_INIT_ATTEMPTED: OnceLock<bool> = OnceLock::new();

// ============================================================================
// Initialization
// ============================================================================

/// Register the harvest metrics with the default registry
///
/// Later calls return `Ok(())` without registering again.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    if METRICS_INIT_ATTEMPTED.get().is_some() {
        return Ok(());
    }
    METRICS_INIT_ATTEMPTED.set(true).ok();

    let metrics = HarvestMetrics {
        passes: register_counter_vec!(
            "vipharvest_passes_total",
            "Harvest passes by outcome",
            &["outcome"]
        )?,
        pass_duration: register_histogram_vec!(
            "vipharvest_pass_duration_seconds",
            "Wall-clock duration of a harvest pass in seconds",
            &["outcome"],
            vec![1.0, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0, 300.0, 600.0]
        )?,
        candidates: register_counter_vec!(
            "vipharvest_candidates_total",
            "Detail pages processed by extraction outcome",
            &["outcome"]
        )?,
        links_collected: register_counter!(
            "vipharvest_links_collected_total",
            "New invite links stored"
        )?,
        sessions: register_counter_vec!(
            "vipharvest_browser_sessions_total",
            "Browser session launches by profile",
            &["profile"]
        )?,
        batch_rounds: register_counter!(
            "vipharvest_batch_rounds_total",
            "Batch rounds executed"
        )?,
        batch_cooldowns: register_counter!(
            "vipharvest_batch_cooldowns_total",
            "Self-throttling pauses taken by batches"
        )?,
    };

    HARVEST_METRICS
        .set(metrics)
        .map_err(|_| "Harvest metrics already initialized")?;

    tracing::info!("Harvest metrics registered");
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Render the default registry in the text exposition format
pub fn gather_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a finished harvest pass
pub fn record_pass(outcome: &str, duration_secs: f64, new_links: u64) {
    let Some(m) = HARVEST_METRICS.get() else {
        return;
    };

    m.passes.with_label_values(&[outcome]).inc();
    m.pass_duration
        .with_label_values(&[outcome])
        .observe(duration_secs);
    if new_links > 0 {
        m.links_collected.inc_by(new_links as f64);
    }
}

/// Record one candidate's extraction outcome (`new`, `duplicate`, `miss`)
pub fn record_candidate(outcome: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.candidates.with_label_values(&[outcome]).inc();
    }
}

/// Record a browser launch with the profile that succeeded
pub fn record_session(profile: &str) {
    if let Some(m) = HARVEST_METRICS.get() {
        m.sessions.with_label_values(&[profile]).inc();
    }
}

/// Record a batch round
pub fn record_batch_round() {
    if let Some(m) = HARVEST_METRICS.get() {
        m.batch_rounds.inc();
    }
}

/// Record a batch cooldown pause
pub fn record_batch_cooldown() {
    if let Some(m) = HARVEST_METRICS.get() {
        m.batch_cooldowns.inc();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics_idempotent() {
        assert!(init_metrics().is_ok());
        assert!(init_metrics().is_ok());
        assert!(HARVEST_METRICS.get().is_some());
    }

    #[test]
    fn test_gather_metrics() {
        let _ = init_metrics();
        record_pass("success", 12.0, 3);
        record_candidate("new");
        let text = gather_metrics().unwrap();
        assert!(text.contains("vipharvest_passes_total"));
        assert!(text.contains("vipharvest_candidates_total"));
    }

    #[test]
    fn test_recording_never_panics() {
        record_pass("aborted", 0.5, 0);
        record_candidate("miss");
        record_session("minimal");
        record_batch_round();
        record_batch_cooldown();
    }
}
