//! Runtime configuration for the provider client, poll loop and sync engine.
//!
//! Provider credentials come from the environment (a `.env` file is loaded
//! by the binary); poll and batch tuning use defaults that match the
//! provider's documented limits and can be overridden from the CLI.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while building configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in .env file or environment")]
    MissingVar(&'static str),

    #[error("Invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },
}

/// Connection settings for the third-party tracking service.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub appid: String,
    pub outerid: String,
    /// Base URL; `create` and `select` endpoints are resolved against it
    pub base_url: String,
    /// `zffs` payment mode sent with every create-task call
    pub payment_mode: String,
    /// Outbound requests per second across all tasks
    pub rate_limit_per_sec: u32,
    pub request_timeout: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            appid: String::new(),
            outerid: String::new(),
            base_url: "https://api.kuaidi.example/".to_string(),
            payment_mode: "1".to_string(),
            rate_limit_per_sec: 5,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl ProviderConfig {
    /// Build from `SHIPSYNC_*` environment variables.
    ///
    /// # Errors
    /// Returns `ConfigError` if credentials are missing or a number fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let appid =
            std::env::var("SHIPSYNC_APPID").map_err(|_| ConfigError::MissingVar("SHIPSYNC_APPID"))?;
        let outerid = std::env::var("SHIPSYNC_OUTERID")
            .map_err(|_| ConfigError::MissingVar("SHIPSYNC_OUTERID"))?;

        let rate_limit_per_sec = match std::env::var("SHIPSYNC_RATE_LIMIT_PER_SEC") {
            Ok(v) => v
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidValue {
                    var: "SHIPSYNC_RATE_LIMIT_PER_SEC",
                    value: v,
                })?,
            Err(_) => defaults.rate_limit_per_sec,
        };

        Ok(Self {
            appid,
            outerid,
            base_url: std::env::var("SHIPSYNC_BASE_URL").unwrap_or(defaults.base_url),
            payment_mode: std::env::var("SHIPSYNC_PAYMENT_MODE").unwrap_or(defaults.payment_mode),
            rate_limit_per_sec,
            request_timeout: defaults.request_timeout,
        })
    }
}

/// Timing and budget for the poll/backoff loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Wait after task creation before the first poll
    pub initial_interval: Duration,
    /// Wait between in-progress polls and page fetches
    pub poll_interval: Duration,
    /// First rejection backoff; doubles per consecutive rejection
    pub backoff_base: Duration,
    /// Upper bound on any single rejection backoff
    pub backoff_cap: Duration,
    /// Non-rejected polls allowed before the task times out
    pub max_attempts: u32,
    pub max_pages: u32,
    pub max_records: usize,
    /// Consecutive structural failures before the task is marked failed
    pub max_consecutive_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(30),
            max_attempts: 60,
            max_pages: 8,
            max_records: 800,
            max_consecutive_failures: 5,
        }
    }
}

impl PollConfig {
    /// Millisecond-scale timings for tests and local fakes.
    pub fn fast() -> Self {
        Self {
            initial_interval: Duration::from_millis(1),
            poll_interval: Duration::from_millis(1),
            backoff_base: Duration::from_millis(2),
            backoff_cap: Duration::from_millis(16),
            ..Self::default()
        }
    }

    /// Wall-clock deadline for one task: every attempt at maximum backoff.
    pub fn task_deadline(&self) -> Duration {
        self.backoff_cap
            .saturating_mul(self.max_attempts)
            .max(self.initial_interval)
    }
}

/// Batch shaping and merge policy.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Tracking numbers per create-task call (remote limit is 50)
    pub batch_size: usize,
    /// Carrier sub-batches polled concurrently
    pub max_concurrent_tasks: usize,
    /// Tail used when a disambiguated carrier's order has no phone
    pub default_phone_tail: String,
    /// Hours an order may stay pending before it is flagged as delayed
    pub delay_threshold_hours: i64,
    pub poll: PollConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_concurrent_tasks: 4,
            default_phone_tail: "1234".to_string(),
            delay_threshold_hours: 72,
            poll: PollConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_provider_limits() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.poll.max_attempts, 60);
        assert_eq!(config.poll.max_pages, 8);
        assert_eq!(config.poll.max_records, 800);
    }

    #[test]
    fn test_task_deadline() {
        let poll = PollConfig::default();
        assert_eq!(poll.task_deadline(), Duration::from_secs(30 * 60));
    }
}
