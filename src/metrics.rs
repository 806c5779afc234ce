//! Prometheus Metrics Module
//!
//! Pre-registered metrics for the sync engine, exposed through
//! [`gather_metrics`] on the daemon's `/metrics` endpoint.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_histogram_vec, register_int_counter_vec, register_int_gauge, Encoder,
    HistogramVec, IntCounterVec, IntGauge, TextEncoder,
};

lazy_static! {
    // --- Task Metrics ---

    /// Create-task calls (by carrier, status)
    pub static ref TASKS_CREATED: IntCounterVec = register_int_counter_vec!(
        opts!("shipsync_tasks_created_total", "Remote query tasks created"),
        &["carrier", "status"]
    ).expect("FATAL: Failed to register TASKS_CREATED metric - check for duplicate registration");

    /// Terminal task states (by carrier, state)
    pub static ref TASKS_FINISHED: IntCounterVec = register_int_counter_vec!(
        opts!("shipsync_tasks_finished_total", "Remote query tasks reaching a terminal state"),
        &["carrier", "state"]
    ).expect("FATAL: Failed to register TASKS_FINISHED metric - check for duplicate registration");

    /// Time from first poll to terminal state
    pub static ref TASK_DURATION: HistogramVec = register_histogram_vec!(
        "shipsync_task_duration_seconds",
        "Time spent polling a remote task",
        &["carrier"],
        vec![1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 900.0]
    ).expect("FATAL: Failed to register TASK_DURATION metric - check for duplicate registration");

    // --- Poll Metrics ---

    /// Poll outcomes (rejected, in_progress, complete, failed, error)
    pub static ref POLLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("shipsync_polls_total", "Select calls by outcome"),
        &["outcome"]
    ).expect("FATAL: Failed to register POLLS_TOTAL metric - check for duplicate registration");

    // --- Merge Metrics ---

    /// Merge outcomes (applied, unchanged, unmatched, ambiguous)
    pub static ref MERGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("shipsync_merges_total", "Remote records merged onto orders by outcome"),
        &["outcome"]
    ).expect("FATAL: Failed to register MERGES_TOTAL metric - check for duplicate registration");

    /// 1 while a scheduled full sync is running
    pub static ref SYNC_RUNNING: IntGauge = register_int_gauge!(
        opts!("shipsync_sync_running", "Whether a full sync pass is in progress")
    ).expect("FATAL: Failed to register SYNC_RUNNING metric - check for duplicate registration");
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
