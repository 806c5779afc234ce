//! Health check HTTP endpoint for the daemon.
//!
//! - `GET /health` - scheduler state and the last run summary
//! - `GET /metrics` - Prometheus text format

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::State;
use axum::{routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::metrics;
use crate::sync::{SharedSchedulerStatus, SyncSummary};

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct HealthResponse {
    /// "healthy", "degraded" (last run had failures) or "critical" (last run could not start)
    pub status: String,
    pub version: String,
    pub sync_running: bool,
    pub runs_completed: u64,
    pub last_finished_at: Option<i64>,
    pub last_summary: Option<SyncSummary>,
    pub last_error: Option<String>,
    pub uptime_seconds: u64,
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct HealthState {
    scheduler: SharedSchedulerStatus,
    started_at: Instant,
}

impl HealthState {
    pub fn new(scheduler: SharedSchedulerStatus) -> Self {
        Self {
            scheduler,
            started_at: Instant::now(),
        }
    }

    pub async fn snapshot(&self) -> HealthResponse {
        let status = self.scheduler.read().await;
        let overall = match (&status.last_error, &status.last_summary) {
            (Some(_), _) => "critical",
            (None, Some(summary)) if !summary.is_success() => "degraded",
            _ => "healthy",
        };
        HealthResponse {
            status: overall.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            sync_running: status.running,
            runs_completed: status.runs_completed,
            last_finished_at: status.last_finished_at.map(|t| t.timestamp()),
            last_summary: status.last_summary.clone(),
            last_error: status.last_error.clone(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
            timestamp: Utc::now().timestamp(),
        }
    }
}

async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(state.snapshot().await)
}

async fn metrics_endpoint() -> String {
    metrics::gather_metrics()
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

/// Serve health and metrics until `cancel` fires.
///
/// A bind failure is logged and the daemon keeps running without the endpoint.
pub async fn run_health_server(port: u16, state: HealthState, cancel: CancellationToken) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Health server failed to bind to {}: {}. Continuing without health endpoint.", addr, e);
            return;
        }
    };
    tracing::info!("Health check server listening on {}", addr);

    let shutdown = async move { cancel.cancelled().await };
    if let Err(e) = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!("Health check server failed: {}", e);
    }
}
