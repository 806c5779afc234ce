//! Tracking Provider Abstraction
//!
//! The third-party courier-tracking service exposes a task-based protocol:
//! a create call returns an opaque task handle, and a select call pages
//! through results once the remote task reaches 100% progress. Selecting
//! the same handle too quickly returns a rejection message instead of data.
//!
//! This module owns the wire DTOs and the classification of raw responses
//! into typed outcomes. Transport lives behind [`TrackingProvider`] so the
//! engine can be driven by the HTTP client or by test fakes.

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ProviderError;

pub use http::HttpTrackingProvider;

/// Phrases the provider uses when a task handle was selected too recently.
const REJECTION_MARKERS: &[&str] = &[
    "刚刚查询过",
    "查询过于频繁",
    "请求被拒绝",
    "queried too recently",
];

const MAX_TASK_HANDLE_LEN: usize = 128;

/// Create-task payload, before credentials are attached by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTaskRequest {
    pub carrier_code: String,
    /// Comma-joined tracking numbers, each optionally suffixed `||tail`
    pub tracking_numbers: String,
    /// Ask the provider to return the task name in `msg`
    pub return_task_name: bool,
}

/// Raw `{code, msg}` envelope shared by both endpoints.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub msg: Value,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiResponse {
    /// Numeric code, accepting `1` and `"1"` alike.
    pub fn code(&self) -> Option<i64> {
        match &self.code {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code() == Some(1)
    }

    /// Human-readable text from `msg` (if a string) or `message`.
    pub fn text(&self) -> String {
        match (&self.msg, &self.message) {
            (Value::String(s), _) if !s.is_empty() => s.clone(),
            (_, Some(m)) => m.clone(),
            (Value::Null, None) => String::new(),
            (other, None) => other.to_string(),
        }
    }

    /// True when the provider refused a select because it came too soon.
    pub fn is_rejection(&self) -> bool {
        let msg = match &self.msg {
            Value::String(s) => s.as_str(),
            _ => "",
        };
        let message = self.message.as_deref().unwrap_or("");
        REJECTION_MARKERS
            .iter()
            .any(|m| msg.contains(m) || message.contains(m))
    }
}

/// One tracking result as returned by the select endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteTrackingRecord {
    /// Tracking number, possibly suffixed `||tail`
    #[serde(rename = "kddh", default, deserialize_with = "lenient_string")]
    pub tracking_number: String,
    #[serde(rename = "kdgs", default, deserialize_with = "lenient_string")]
    pub carrier_code: String,
    #[serde(rename = "wuliuzhuangtai", default, deserialize_with = "lenient_string")]
    pub raw_status_text: String,
    /// History text; JSON arrays are kept as their serialized form
    #[serde(rename = "xiangxiwuliu", default, deserialize_with = "lenient_string")]
    pub raw_history_text: String,
    #[serde(rename = "zuizaoshijian", default, deserialize_with = "lenient_string")]
    pub first_event_time: String,
    #[serde(rename = "zuiwanshijian", default, deserialize_with = "lenient_string")]
    pub last_event_time: String,
    #[serde(rename = "zuixinwuliu", default, deserialize_with = "lenient_string")]
    pub last_event_summary: String,
    /// Free text, not reliable enough to match on
    #[serde(rename = "beizhu", default, deserialize_with = "lenient_string")]
    pub source_order_ref: String,
}

/// Successful select payload (`msg` of a `code == 1` response).
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct SelectPage {
    #[serde(rename = "jindu", default, deserialize_with = "lenient_u32")]
    pub progress_percent: u32,
    #[serde(rename = "totalpage", default, deserialize_with = "lenient_u32")]
    pub total_pages: u32,
    #[serde(default)]
    pub list: Vec<RemoteTrackingRecord>,
}

/// Classified result of one select call.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Selected too recently; back off and retry without spending budget
    Rejected(String),
    InProgress { progress: u32 },
    Complete(SelectPage),
    /// Structural failure reported by the provider
    Failed(String),
}

/// Classify a select response.
pub fn classify_select(response: &ApiResponse) -> PollOutcome {
    if response.is_rejection() {
        return PollOutcome::Rejected(response.text());
    }
    if !response.is_ok() {
        return PollOutcome::Failed(format!(
            "code {}: {}",
            response.code,
            response.text()
        ));
    }

    match SelectPage::deserialize(&response.msg) {
        Ok(page) if page.progress_percent >= 100 => PollOutcome::Complete(page),
        Ok(page) => PollOutcome::InProgress {
            progress: page.progress_percent,
        },
        Err(e) => PollOutcome::Failed(format!("malformed select payload: {}", e)),
    }
}

/// Extract the task handle from a create-task response.
///
/// # Errors
/// Returns a description of the failure when `code != 1` or `msg` is not a
/// plausible handle.
pub fn task_handle(response: &ApiResponse) -> Result<String, String> {
    if !response.is_ok() {
        return Err(format!("code {}: {}", response.code, response.text()));
    }
    match &response.msg {
        Value::String(s) if is_task_handle(s) => Ok(s.trim().to_string()),
        other => Err(format!("unexpected task handle: {}", other)),
    }
}

fn is_task_handle(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty()
        && s.chars().count() <= MAX_TASK_HANDLE_LEN
        && !s.chars().any(|c| c.is_whitespace() || c.is_control())
}

/// Transport to the tracking service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackingProvider: Send + Sync {
    /// Create a remote query task for one carrier sub-batch.
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<ApiResponse, ProviderError>;

    /// Fetch one page of results for a task handle.
    async fn select_result(&self, task_handle: &str, page: u32) -> Result<ApiResponse, ProviderError>;
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    })
}

fn lenient_u32<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64),
        Value::Null => Some(0),
        _ => None,
    };
    parsed
        .map(|n| n.min(u32::MAX as u64) as u32)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a number, got {}", value)))
}
