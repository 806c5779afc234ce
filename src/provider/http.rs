//! HTTP client for the courier-tracking service.
//!
//! Both endpoints take form-encoded POSTs and answer with a JSON
//! `{code, msg}` envelope. Every call waits on a shared rate limiter so
//! concurrent poll loops cannot exceed the provider's request quota.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use tracing::{debug, info};

use super::{ApiResponse, CreateTaskRequest, TrackingProvider};
use crate::config::ProviderConfig;
use crate::error::ProviderError;

type DirectRateLimiter = RateLimiter<governor::state::direct::NotKeyed, InMemoryState, DefaultClock>;

/// reqwest-backed [`TrackingProvider`].
#[derive(Clone)]
pub struct HttpTrackingProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    rate_limiter: Arc<DirectRateLimiter>,
}

impl HttpTrackingProvider {
    /// Build a client from provider configuration.
    ///
    /// # Errors
    /// Returns `ProviderError::Configuration` if the rate limit is zero or the
    /// HTTP client cannot be built.
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let per_sec = NonZeroU32::new(config.rate_limit_per_sec).ok_or_else(|| {
            ProviderError::Configuration("rate_limit_per_sec must be non-zero".to_string())
        })?;
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_sec)));

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        info!(
            base_url = %config.base_url,
            rate_limit = config.rate_limit_per_sec,
            "Tracking provider client initialized"
        );

        Ok(Self {
            config,
            client,
            rate_limiter,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post_form(&self, path: &str, form: &[(&str, &str)]) -> Result<ApiResponse, ProviderError> {
        self.rate_limiter.until_ready().await;

        let url = self.endpoint(path);
        debug!(url = %url, "Posting to tracking provider");

        let response = self.client.post(&url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str::<ApiResponse>(&body)
            .map_err(|e| ProviderError::Decode(format!("{}: {}", e, truncate(&body, 200))))
    }
}

#[async_trait]
impl TrackingProvider for HttpTrackingProvider {
    async fn create_task(&self, request: &CreateTaskRequest) -> Result<ApiResponse, ProviderError> {
        let back_task_name = if request.return_task_name { "yes" } else { "no" };
        let form = [
            ("appid", self.config.appid.as_str()),
            ("outerid", self.config.outerid.as_str()),
            ("zffs", self.config.payment_mode.as_str()),
            ("kdgs", request.carrier_code.as_str()),
            ("kddhs", request.tracking_numbers.as_str()),
            ("isBackTaskName", back_task_name),
        ];
        self.post_form("create", &form).await
    }

    async fn select_result(&self, task_handle: &str, page: u32) -> Result<ApiResponse, ProviderError> {
        let page = page.to_string();
        let form = [
            ("appid", self.config.appid.as_str()),
            ("outerid", self.config.outerid.as_str()),
            ("pageno", page.as_str()),
            ("taskname", task_handle),
        ];
        self.post_form("select", &form).await
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_limit_rejected() {
        let config = ProviderConfig {
            rate_limit_per_sec: 0,
            ..ProviderConfig::default()
        };
        assert!(matches!(
            HttpTrackingProvider::new(config),
            Err(ProviderError::Configuration(_))
        ));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let config = ProviderConfig {
            base_url: "http://localhost:8080/api/".to_string(),
            ..ProviderConfig::default()
        };
        let provider = HttpTrackingProvider::new(config).unwrap();
        assert_eq!(provider.endpoint("select"), "http://localhost:8080/api/select");
    }
}
