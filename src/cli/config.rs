//! CLI configuration bridging arguments to [`SyncConfig`].
//!
//! Flags are validated here so command handlers work with typed config.

use std::time::Duration;

use clap::Args;
use thiserror::Error;

use crate::config::{PollConfig, SyncConfig};

/// Provider accepts at most this many tracking numbers per task.
const MAX_BATCH_SIZE: usize = 50;

/// Errors from out-of-range sync flags.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SyncArgsError {
    #[error("--batch-size must be between 1 and 50, got {0}")]
    BatchSize(usize),

    #[error("--max-concurrent must be at least 1")]
    MaxConcurrent,

    #[error("--max-attempts must be at least 1")]
    MaxAttempts,

    #[error("--backoff-cap-secs ({cap}) must not be below --backoff-base-secs ({base})")]
    Backoff { base: u64, cap: u64 },
}

/// Tuning flags shared by the sync subcommands.
#[derive(Debug, Clone, Args)]
pub struct SyncArgs {
    /// Tracking numbers per remote task
    #[arg(long, default_value_t = 50)]
    pub batch_size: usize,
    /// Carrier sub-batches polled at the same time
    #[arg(long, default_value_t = 4)]
    pub max_concurrent: usize,
    /// Non-rejected polls per task before it times out
    #[arg(long, default_value_t = 60)]
    pub max_attempts: u32,
    /// Seconds to wait after the first rejection
    #[arg(long, default_value_t = 2)]
    pub backoff_base_secs: u64,
    /// Longest single backoff in seconds
    #[arg(long, default_value_t = 30)]
    pub backoff_cap_secs: u64,
    /// Phone tail sent for orders without a phone
    #[arg(long, default_value = "1234")]
    pub default_phone_tail: String,
    /// Hours a pending order may wait before it is flagged as delayed
    #[arg(long, default_value_t = 72)]
    pub delay_threshold_hours: i64,
}

impl Default for SyncArgs {
    fn default() -> Self {
        let config = SyncConfig::default();
        Self {
            batch_size: config.batch_size,
            max_concurrent: config.max_concurrent_tasks,
            max_attempts: config.poll.max_attempts,
            backoff_base_secs: config.poll.backoff_base.as_secs(),
            backoff_cap_secs: config.poll.backoff_cap.as_secs(),
            default_phone_tail: config.default_phone_tail,
            delay_threshold_hours: config.delay_threshold_hours,
        }
    }
}

impl SyncArgs {
    /// Validate and convert into engine configuration.
    ///
    /// # Errors
    /// Returns `SyncArgsError` for out-of-range values.
    pub fn to_config(&self) -> Result<SyncConfig, SyncArgsError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(SyncArgsError::BatchSize(self.batch_size));
        }
        if self.max_concurrent == 0 {
            return Err(SyncArgsError::MaxConcurrent);
        }
        if self.max_attempts == 0 {
            return Err(SyncArgsError::MaxAttempts);
        }
        if self.backoff_cap_secs < self.backoff_base_secs {
            return Err(SyncArgsError::Backoff {
                base: self.backoff_base_secs,
                cap: self.backoff_cap_secs,
            });
        }

        Ok(SyncConfig {
            batch_size: self.batch_size,
            max_concurrent_tasks: self.max_concurrent,
            default_phone_tail: self.default_phone_tail.clone(),
            delay_threshold_hours: self.delay_threshold_hours,
            poll: PollConfig {
                max_attempts: self.max_attempts,
                backoff_base: Duration::from_secs(self.backoff_base_secs),
                backoff_cap: Duration::from_secs(self.backoff_cap_secs),
                ..PollConfig::default()
            },
        })
    }
}
