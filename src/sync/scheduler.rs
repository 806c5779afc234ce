//! Recurring full sync.
//!
//! Runs once immediately, then at the next local midnight, then every 24
//! hours until cancelled. Failures are logged and never stop the schedule.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use tokio::sync::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics::SYNC_RUNNING;
use crate::sync::engine::{SyncEngine, SyncSummary};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Time from `now` until the following local midnight.
pub fn duration_until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let tz = now.timezone();
    let next_midnight = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .map(|d| d.and_time(NaiveTime::MIN))
        .and_then(|naive| tz.from_local_datetime(&naive).earliest());

    match next_midnight {
        Some(next) => (next - now.clone()).to_std().unwrap_or(Duration::ZERO),
        // Midnight skipped by a DST change; fall back to a full day
        None => DAY,
    }
}

/// Last completed run, shared with the health endpoint.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatus {
    pub running: bool,
    pub runs_completed: u64,
    pub last_finished_at: Option<DateTime<chrono::Utc>>,
    pub last_summary: Option<SyncSummary>,
    pub last_error: Option<String>,
}

pub type SharedSchedulerStatus = Arc<RwLock<SchedulerStatus>>;

/// Daily `sync_all` driver.
pub struct SyncScheduler {
    engine: SyncEngine,
    status: SharedSchedulerStatus,
}

impl SyncScheduler {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine,
            status: Arc::new(RwLock::new(SchedulerStatus::default())),
        }
    }

    pub fn status(&self) -> SharedSchedulerStatus {
        self.status.clone()
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!("Sync scheduler started");
        self.run_once(&cancel).await;

        let first_wait = duration_until_next_midnight(&Local::now());
        self.run_daily(first_wait, &cancel).await;
        info!("Sync scheduler stopped");
    }

    /// Fire after `first_wait`, then every 24 hours from that first tick.
    ///
    /// Ticks are absolute, so a slow run never pushes later ones back. A run
    /// that overruns a whole tick delays only that tick.
    async fn run_daily(&self, first_wait: Duration, cancel: &CancellationToken) {
        let mut ticks = tokio::time::interval_at(Instant::now() + first_wait, DAY);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut wait = first_wait;
        loop {
            info!(next_run_in_secs = wait.as_secs(), "Waiting for next scheduled sync");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }
            let started = Instant::now();
            self.run_once(cancel).await;
            if cancel.is_cancelled() {
                break;
            }
            wait = DAY.saturating_sub(started.elapsed());
        }
    }

    /// One full pass; the result is recorded in the shared status.
    pub async fn run_once(&self, cancel: &CancellationToken) {
        self.status.write().await.running = true;
        SYNC_RUNNING.set(1);

        let result = self.engine.sync_all(cancel).await;

        SYNC_RUNNING.set(0);
        let mut status = self.status.write().await;
        status.running = false;
        status.runs_completed += 1;
        status.last_finished_at = Some(chrono::Utc::now());
        match result {
            Ok(summary) => {
                if summary.is_success() {
                    info!(updated = summary.orders_updated, "Scheduled sync completed");
                } else {
                    for failure in &summary.errors {
                        warn!(context = %failure.context, error = %failure.message, "Scheduled sync failure");
                    }
                }
                status.last_error = None;
                status.last_summary = Some(summary);
            }
            Err(e) => {
                error!(error = %e, "Scheduled sync could not start");
                status.last_error = Some(e.to_string());
            }
        }
    }
}
