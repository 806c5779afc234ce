//! Error taxonomy for the sync engine.
//!
//! Failures are scoped to the smallest unit that can fail: a single order
//! for `sync_one`, a single carrier sub-batch for `sync_batch`. Transient
//! poll rejections are not errors at all (see `PollOutcome::Rejected`).

use thiserror::Error;

use crate::carrier::RecognitionError;
use crate::types::OrderId;

/// Wire-level failures talking to the tracking provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Could not decode provider response: {0}")]
    Decode(String),

    #[error("Provider configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// Failures of the order store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    #[error("Order store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Order store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the sync engine, each scoped to one order or one task.
#[derive(Error, Debug)]
pub enum SyncError {
    /// No carrier rule matched; the order stays unsynced
    #[error("Carrier recognition failed: {0}")]
    Recognition(#[from] RecognitionError),

    /// Remote create-task call failed for one carrier sub-batch
    #[error("Task creation failed for carrier {carrier}: {message}")]
    TaskCreation { carrier: String, message: String },

    /// Retry budget or deadline exhausted while polling
    #[error("Task {task} timed out after {attempts} attempts")]
    PollTimeout { task: String, attempts: u32 },

    /// Provider kept answering with structural failures
    #[error("Task {task} failed: {message}")]
    PollFailed { task: String, message: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error(transparent)]
    Store(#[from] StoreError),
}
