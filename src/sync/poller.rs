//! Poll/backoff engine for remote query tasks.
//!
//! Each task is polled in its own loop that suspends on a timer between
//! attempts. Three outcomes drive the loop:
//!
//! - **Rejected**: the handle was selected too recently. Back off
//!   exponentially (`base * 2^n`, capped) without spending retry budget.
//! - **In progress**: wait the fixed interval and poll the same page.
//! - **Complete**: collect the page; keep paging up to the page/record caps.
//!
//! Transport errors are logged per attempt and retried. The loop ends in
//! `Timeout` when the attempt budget or the task deadline runs out, and in
//! `Failed` after repeated structural failures or cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::PollConfig;
use crate::error::SyncError;
use crate::logging::LogThrottle;
use crate::metrics::{POLLS_TOTAL, TASKS_FINISHED, TASK_DURATION};
use crate::provider::{classify_select, PollOutcome, TrackingProvider};
use crate::sync::task::{SyncTask, SyncTaskState};

const REJECTION_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Exponential backoff for rejected polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Wait before the next poll after `consecutive_rejections` prior rejections.
    ///
    /// Non-decreasing in its argument and never above `cap`.
    pub fn delay(&self, consecutive_rejections: u32) -> Duration {
        let factor = 1u32.checked_shl(consecutive_rejections).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

impl From<&PollConfig> for BackoffPolicy {
    fn from(config: &PollConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_cap)
    }
}

/// Drives [`SyncTask`]s from `Created` to a terminal state.
#[derive(Clone)]
pub struct TaskPoller {
    provider: Arc<dyn TrackingProvider>,
    config: PollConfig,
    backoff: BackoffPolicy,
}

impl TaskPoller {
    pub fn new(provider: Arc<dyn TrackingProvider>, config: PollConfig) -> Self {
        let backoff = BackoffPolicy::from(&config);
        Self {
            provider,
            config,
            backoff,
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Poll `task` until it completes, times out, fails, or `cancel` fires.
    ///
    /// On `Ok`, the task is `Complete` and its records are ready to merge.
    ///
    /// # Errors
    /// - `PollTimeout` when the attempt budget or deadline is exhausted
    /// - `PollFailed` after `max_consecutive_failures` structural failures
    /// - `Cancelled` if the token fires while waiting
    #[instrument(skip(self, task, cancel), fields(carrier = %task.carrier_code, task = %task.task_handle))]
    pub async fn run(&self, task: &mut SyncTask, cancel: &CancellationToken) -> Result<(), SyncError> {
        let started = Instant::now();
        let result = self.poll_loop(task, cancel).await;

        let state = task.state().to_string();
        TASK_DURATION
            .with_label_values(&[task.carrier_code.as_str()])
            .observe(started.elapsed().as_secs_f64());
        TASKS_FINISHED
            .with_label_values(&[task.carrier_code.as_str(), state.as_str()])
            .inc();

        match &result {
            Ok(()) => info!(
                records = task.records.len(),
                pages = task.pages_fetched,
                attempts = task.attempts,
                rejections = task.rejection_count,
                "Task complete"
            ),
            Err(e) => warn!(
                state = %task.state(),
                attempts = task.attempts,
                rejections = task.rejection_count,
                error = %e,
                "Task ended without results"
            ),
        }
        result
    }

    async fn poll_loop(&self, task: &mut SyncTask, cancel: &CancellationToken) -> Result<(), SyncError> {
        if let Err(e) = task.transition(SyncTaskState::Polling) {
            return Err(SyncError::PollFailed {
                task: task.task_handle.clone(),
                message: e.to_string(),
            });
        }

        let deadline = Instant::now() + self.config.task_deadline();
        let mut page: u32 = 1;
        let mut consecutive_rejections: u32 = 0;
        let mut consecutive_failures: u32 = 0;
        let mut rejection_log = LogThrottle::new(REJECTION_LOG_INTERVAL);

        self.pause(task, self.config.initial_interval, cancel).await?;

        loop {
            if task.attempts >= self.config.max_attempts {
                return Err(self.time_out(task, "retry budget exhausted"));
            }
            if Instant::now() >= deadline {
                return Err(self.time_out(task, "task deadline passed"));
            }

            let response = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = task.abort(SyncTaskState::Failed, "cancelled");
                    return Err(SyncError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(self.time_out(task, "task deadline passed"));
                }
                response = self.provider.select_result(&task.task_handle, page) => response,
            };

            let outcome = match response {
                Ok(response) => classify_select(&response),
                Err(e) => {
                    task.attempts += 1;
                    consecutive_rejections = 0;
                    POLLS_TOTAL.with_label_values(&["error"]).inc();
                    warn!(attempt = task.attempts, page, error = %e, "Poll request failed, will retry");
                    self.pause(task, self.config.poll_interval, cancel).await?;
                    continue;
                }
            };

            match outcome {
                PollOutcome::Rejected(message) => {
                    POLLS_TOTAL.with_label_values(&["rejected"]).inc();
                    let delay = self.backoff.delay(consecutive_rejections);
                    consecutive_rejections += 1;
                    task.rejection_count += 1;
                    if let Some(suppressed) = rejection_log.permit() {
                        warn!(
                            delay_ms = delay.as_millis() as u64,
                            rejections = task.rejection_count,
                            suppressed,
                            message = %message,
                            "Poll rejected by provider, backing off"
                        );
                    }
                    self.pause(task, delay, cancel).await?;
                }
                PollOutcome::InProgress { progress } => {
                    POLLS_TOTAL.with_label_values(&["in_progress"]).inc();
                    task.attempts += 1;
                    consecutive_rejections = 0;
                    consecutive_failures = 0;
                    task.record_progress(progress);
                    debug!(attempt = task.attempts, progress, "Task in progress");
                    self.pause(task, self.config.poll_interval, cancel).await?;
                }
                PollOutcome::Complete(result) => {
                    POLLS_TOTAL.with_label_values(&["complete"]).inc();
                    task.attempts += 1;
                    consecutive_rejections = 0;
                    consecutive_failures = 0;
                    task.record_progress(100);

                    let received = result.list.len();
                    let dropped = task.append_page(result.list, self.config.max_records);
                    debug!(page, total_pages = result.total_pages, received, dropped, "Page collected");

                    let more_pages = page < result.total_pages;
                    let may_continue = page < self.config.max_pages
                        && task.records.len() < self.config.max_records;

                    if more_pages && may_continue {
                        page += 1;
                        self.pause(task, self.config.poll_interval, cancel).await?;
                        continue;
                    }
                    if more_pages || dropped > 0 {
                        warn!(
                            total_pages = result.total_pages,
                            pages_fetched = task.pages_fetched,
                            records = task.records.len(),
                            "Result truncated at page/record cap"
                        );
                    }

                    // Polling -> Complete is always valid here
                    let _ = task.transition(SyncTaskState::Complete);
                    return Ok(());
                }
                PollOutcome::Failed(message) => {
                    POLLS_TOTAL.with_label_values(&["failed"]).inc();
                    task.attempts += 1;
                    consecutive_rejections = 0;
                    consecutive_failures += 1;
                    warn!(attempt = task.attempts, consecutive_failures, message = %message, "Provider reported failure");

                    if consecutive_failures >= self.config.max_consecutive_failures {
                        let _ = task.abort(SyncTaskState::Failed, message.clone());
                        return Err(SyncError::PollFailed {
                            task: task.task_handle.clone(),
                            message,
                        });
                    }
                    self.pause(task, self.config.poll_interval, cancel).await?;
                }
            }
        }
    }

    fn time_out(&self, task: &mut SyncTask, reason: &str) -> SyncError {
        let _ = task.abort(SyncTaskState::Timeout, reason);
        SyncError::PollTimeout {
            task: task.task_handle.clone(),
            attempts: task.attempts,
        }
    }

    /// Sleep for `duration` unless cancelled first.
    async fn pause(&self, task: &mut SyncTask, duration: Duration, cancel: &CancellationToken) -> Result<(), SyncError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = task.abort(SyncTaskState::Failed, "cancelled");
                Err(SyncError::Cancelled)
            }
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::{ApiResponse, CreateTaskRequest};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted select responses; repeats the last one when exhausted.
    struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<Value, String>>>,
        calls: Mutex<Vec<(String, u32, Instant)>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<Value, String>>) -> Self {
            Self {
                responses: Mutex::new(script.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn pages_requested(&self) -> Vec<u32> {
            self.calls.lock().unwrap().iter().map(|c| c.1).collect()
        }

        fn call_times(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().iter().map(|c| c.2).collect()
        }
    }

    #[async_trait]
    impl TrackingProvider for ScriptedProvider {
        async fn create_task(&self, _request: &CreateTaskRequest) -> Result<ApiResponse, ProviderError> {
            unreachable!("poller never creates tasks")
        }

        async fn select_result(&self, task_handle: &str, page: u32) -> Result<ApiResponse, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((task_handle.to_string(), page, Instant::now()));
            let mut responses = self.responses.lock().unwrap();
            let next = if responses.len() > 1 {
                responses.pop_front().unwrap()
            } else {
                responses.front().cloned().unwrap()
            };
            match next {
                Ok(v) => Ok(serde_json::from_value(v).unwrap()),
                Err(e) => Err(ProviderError::Transport(e)),
            }
        }
    }

    fn rejected() -> Result<Value, String> {
        Ok(json!({"code": 0, "msg": "该任务刚刚查询过，请求被拒绝"}))
    }

    fn progress(p: u32) -> Result<Value, String> {
        Ok(json!({"code": 1, "msg": {"jindu": p, "totalpage": 0, "list": []}}))
    }

    fn page(total: u32, numbers: &[&str]) -> Result<Value, String> {
        let list: Vec<Value> = numbers
            .iter()
            .map(|n| json!({"kddh": n, "wuliuzhuangtai": "运输中"}))
            .collect();
        Ok(json!({"code": 1, "msg": {"jindu": 100, "totalpage": total, "list": list}}))
    }

    fn new_task() -> SyncTask {
        SyncTask::new("yuantong", "task-1", vec!["YT0000000001".to_string()])
    }

    fn poller(provider: Arc<ScriptedProvider>, config: PollConfig) -> TaskPoller {
        TaskPoller::new(provider, config)
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(30));
        let delays: Vec<u64> = (0..6).map(|n| policy.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30]);
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_then_complete() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            progress(10),
            progress(60),
            page(1, &["YT0000000001"]),
        ]));
        let poller = poller(provider.clone(), PollConfig::default());
        let mut task = new_task();

        poller.run(&mut task, &CancellationToken::new()).await.unwrap();

        assert_eq!(task.state(), SyncTaskState::Complete);
        assert_eq!(task.records.len(), 1);
        assert_eq!(task.attempts, 3);
        assert_eq!(task.progress_percent, 100);
        assert_eq!(provider.pages_requested(), vec![1, 1, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_back_off_without_spending_budget() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            rejected(),
            rejected(),
            rejected(),
            page(1, &["YT0000000001"]),
        ]));
        let config = PollConfig::default();
        let poller = poller(provider.clone(), config.clone());
        let mut task = new_task();

        let start = Instant::now();
        poller.run(&mut task, &CancellationToken::new()).await.unwrap();

        assert_eq!(task.rejection_count, 3);
        assert_eq!(task.attempts, 1);

        let times = provider.call_times();
        let gaps: Vec<u64> = times.windows(2).map(|w| (w[1] - w[0]).as_secs()).collect();
        assert_eq!((times[0] - start).as_secs(), config.initial_interval.as_secs());
        assert_eq!(gaps, vec![2, 4, 8]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paging_is_bounded() {
        let provider = Arc::new(ScriptedProvider::new(vec![page(20, &["A", "B"])]));
        let poller = poller(provider.clone(), PollConfig::fast());
        let mut task = new_task();

        poller.run(&mut task, &CancellationToken::new()).await.unwrap();

        assert_eq!(provider.pages_requested(), (1..=8).collect::<Vec<u32>>());
        assert_eq!(task.records.len(), 16);
        assert_eq!(task.pages_fetched, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_cap_stops_paging() {
        let provider = Arc::new(ScriptedProvider::new(vec![page(5, &["A", "B", "C"])]));
        let config = PollConfig {
            max_records: 4,
            ..PollConfig::fast()
        };
        let poller = poller(provider.clone(), config);
        let mut task = new_task();

        poller.run(&mut task, &CancellationToken::new()).await.unwrap();

        assert_eq!(provider.pages_requested(), vec![1, 2]);
        assert_eq!(task.records.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_times_out() {
        let provider = Arc::new(ScriptedProvider::new(vec![progress(50)]));
        let config = PollConfig {
            max_attempts: 5,
            ..PollConfig::fast()
        };
        let poller = poller(provider.clone(), config);
        let mut task = new_task();

        let err = poller.run(&mut task, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SyncError::PollTimeout { attempts: 5, .. }));
        assert_eq!(task.state(), SyncTaskState::Timeout);
        assert_eq!(provider.pages_requested().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_endless_rejections_hit_deadline() {
        let provider = Arc::new(ScriptedProvider::new(vec![rejected()]));
        let config = PollConfig {
            max_attempts: 3,
            ..PollConfig::fast()
        };
        let poller = poller(provider, config);
        let mut task = new_task();

        let err = poller.run(&mut task, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SyncError::PollTimeout { attempts: 0, .. }));
        assert_eq!(task.state(), SyncTaskState::Timeout);
        assert!(task.rejection_count > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_errors_are_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err("connection reset".to_string()),
            Err("timeout".to_string()),
            page(1, &["YT0000000001"]),
        ]));
        let poller = poller(provider, PollConfig::fast());
        let mut task = new_task();

        poller.run(&mut task, &CancellationToken::new()).await.unwrap();
        assert_eq!(task.attempts, 3);
        assert_eq!(task.records.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_structural_failures_fail_task() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(json!({"code": -3, "msg": "任务不存在"}))]));
        let poller = poller(provider.clone(), PollConfig::fast());
        let mut task = new_task();

        let err = poller.run(&mut task, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SyncError::PollFailed { .. }));
        assert_eq!(task.state(), SyncTaskState::Failed);
        assert_eq!(provider.pages_requested().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_loop() {
        let provider = Arc::new(ScriptedProvider::new(vec![progress(10)]));
        let poller = poller(provider, PollConfig::default());
        let mut task = new_task();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = poller.run(&mut task, &cancel).await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(task.state(), SyncTaskState::Failed);
    }

    /// Select calls that never answer within the test.
    struct StalledProvider;

    #[async_trait]
    impl TrackingProvider for StalledProvider {
        async fn create_task(&self, _request: &CreateTaskRequest) -> Result<ApiResponse, ProviderError> {
            unreachable!("poller never creates tasks")
        }

        async fn select_result(&self, _task_handle: &str, _page: u32) -> Result<ApiResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
            Err(ProviderError::Transport("stalled".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_in_flight_select() {
        let config = PollConfig::default();
        let poller = TaskPoller::new(Arc::new(StalledProvider), config.clone());
        let mut task = new_task();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            let after = config.initial_interval + Duration::from_secs(5);
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                cancel.cancel();
            })
        };

        let start = Instant::now();
        let err = poller.run(&mut task, &cancel).await.unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(task.state(), SyncTaskState::Failed);
        assert_eq!((Instant::now() - start).as_secs(), config.initial_interval.as_secs() + 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_in_flight_select() {
        let config = PollConfig::fast();
        let poller = TaskPoller::new(Arc::new(StalledProvider), config.clone());
        let mut task = new_task();

        let start = Instant::now();
        let err = poller.run(&mut task, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, SyncError::PollTimeout { attempts: 0, .. }));
        assert_eq!(task.state(), SyncTaskState::Timeout);
        assert!(Instant::now() - start <= config.task_deadline());
    }
}
