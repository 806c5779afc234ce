//! Remote query task state machine.
//!
//! ```text
//! Created -> Polling -> Complete
//!                    -> Timeout
//!                    -> Failed
//! ```
//!
//! Created by the submitter, mutated only by the poller, dropped after merge.

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use crate::provider::RemoteTrackingRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncTaskState {
    Created,
    Polling,
    Complete,
    Timeout,
    Failed,
}

impl SyncTaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Timeout | Self::Failed)
    }

    fn can_transition_to(&self, next: SyncTaskState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Polling)
                | (Self::Created, Self::Failed)
                | (Self::Polling, Self::Complete)
                | (Self::Polling, Self::Timeout)
                | (Self::Polling, Self::Failed)
        )
    }
}

impl std::fmt::Display for SyncTaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Polling => write!(f, "POLLING"),
            Self::Complete => write!(f, "COMPLETE"),
            Self::Timeout => write!(f, "TIMEOUT"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid state transition for task {task}: {from} -> {to}")]
pub struct InvalidTransition {
    pub task: String,
    pub from: SyncTaskState,
    pub to: SyncTaskState,
}

/// One in-flight remote query covering a carrier sub-batch.
#[derive(Debug, Clone)]
pub struct SyncTask {
    pub carrier_code: String,
    /// Opaque handle returned by the create call
    pub task_handle: String,
    /// Keys exactly as submitted (including any `||tail`)
    pub submitted_tracking_numbers: BTreeSet<String>,
    pub progress_percent: u32,
    pub records: Vec<RemoteTrackingRecord>,
    state: SyncTaskState,
    /// Non-rejected polls spent so far
    pub attempts: u32,
    pub rejection_count: u32,
    pub pages_fetched: u32,
    /// Why the task ended in `Timeout`/`Failed`
    pub failure_reason: Option<String>,
}

impl SyncTask {
    #[must_use]
    pub fn new(
        carrier_code: impl Into<String>,
        task_handle: impl Into<String>,
        submitted: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            carrier_code: carrier_code.into(),
            task_handle: task_handle.into(),
            submitted_tracking_numbers: submitted.into_iter().collect(),
            progress_percent: 0,
            records: Vec::new(),
            state: SyncTaskState::Created,
            attempts: 0,
            rejection_count: 0,
            pages_fetched: 0,
            failure_reason: None,
        }
    }

    pub fn state(&self) -> SyncTaskState {
        self.state
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: SyncTaskState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                task: self.task_handle.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// End the task in `Timeout` or `Failed` with a reason.
    pub fn abort(&mut self, next: SyncTaskState, reason: impl Into<String>) -> Result<(), InvalidTransition> {
        self.transition(next)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn record_progress(&mut self, percent: u32) {
        self.progress_percent = percent.min(100);
    }

    /// Append one page of records, keeping at most `max_records` in total.
    ///
    /// Returns how many records were dropped by the cap.
    pub fn append_page(&mut self, records: Vec<RemoteTrackingRecord>, max_records: usize) -> usize {
        self.pages_fetched += 1;
        let room = max_records.saturating_sub(self.records.len());
        let dropped = records.len().saturating_sub(room);
        self.records.extend(records.into_iter().take(room));
        dropped
    }
}
