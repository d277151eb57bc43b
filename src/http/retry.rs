//! Retrying request execution with exponential backoff and jitter.
//!
//! Used for the direct, unbatched calls made in cloud mode. Transport
//! failures and 5xx responses are retried; 4xx responses are handed back to
//! the caller untouched.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tokio::time::sleep;

use crate::core::EventsOptions;
use crate::error::{ErrorCode, EventsError, Result};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included. Default: 5
    pub max_attempts: u32,

    /// Base delay in milliseconds. Default: 100
    pub base_delay_ms: u64,

    /// Backoff multiplier. Default: 2.0
    pub backoff_multiplier: f64,

    /// Upper bound of the random jitter as a fraction of the delay. Default: 0.2
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.2,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for custom configuration.
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Deterministic part of the delay: `base_delay * multiplier ^ attempt`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponential =
            self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(exponential as u64)
    }

    /// Delay before retrying after `attempt`, with up to `jitter_ratio` of
    /// the base delay added at random.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_millis() as f64;
        let jitter = base * self.jitter_ratio * rand::random::<f64>();
        Duration::from_millis((base + jitter) as u64)
    }
}

/// Builder for RetryConfig.
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    backoff_multiplier: Option<f64>,
    jitter_ratio: Option<f64>,
}

impl RetryConfigBuilder {
    /// Set maximum attempts, the first one included.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Set base delay in milliseconds.
    pub fn base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = Some(delay);
        self
    }

    /// Set backoff multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = Some(multiplier);
        self
    }

    /// Set jitter as a fraction of the delay, clamped to `0.0..=1.0`.
    pub fn jitter_ratio(mut self, ratio: f64) -> Self {
        self.jitter_ratio = Some(ratio.clamp(0.0, 1.0));
        self
    }

    /// Build the retry configuration.
    pub fn build(self) -> RetryConfig {
        let defaults = RetryConfig::default();
        RetryConfig {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay_ms: self.base_delay_ms.unwrap_or(defaults.base_delay_ms),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(defaults.backoff_multiplier),
            jitter_ratio: self.jitter_ratio.unwrap_or(defaults.jitter_ratio),
        }
    }
}

/// `2^attempt * 100` ms plus up to 20% jitter.
pub fn backoff(attempt: u32) -> Duration {
    RetryConfig::default().calculate_delay(attempt)
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub struct RetryingExecutor {
    client: Client,
    sdk_key: String,
    config: RetryConfig,
}

impl RetryingExecutor {
    pub fn new(options: &EventsOptions, sdk_key: impl Into<String>) -> Result<Self> {
        Self::with_config(options, sdk_key, RetryConfig::default())
    }

    pub fn with_config(
        options: &EventsOptions,
        sdk_key: impl Into<String>,
        config: RetryConfig,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| {
                EventsError::with_source(
                    ErrorCode::InitializationError,
                    "Failed to create HTTP client",
                    e,
                )
            })?;

        Ok(Self {
            client,
            sdk_key: sdk_key.into(),
            config,
        })
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Issue a request, retrying transport failures and 5xx responses.
    ///
    /// The body is read to the end before returning. A 5xx on the final
    /// attempt is returned as a response; a transport failure on the final
    /// attempt is returned as an error.
    pub async fn perform_request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        query: &[(&str, &str)],
    ) -> Result<ApiResponse> {
        let payload = body
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| EventsError::serialization("Failed to serialize request body", e))?;

        let mut attempt = 1;
        loop {
            let mut builder = self
                .client
                .request(method.clone(), url)
                .header(AUTHORIZATION, &self.sdk_key)
                .header(CONTENT_TYPE, "application/json")
                .header(ACCEPT, "application/json")
                .query(query);
            if let Some(ref payload) = payload {
                builder = builder.body(payload.clone());
            }

            // A request that cannot be built will not get better by retrying.
            let request = builder.build().map_err(|e| {
                EventsError::with_source(ErrorCode::TransportError, "Failed to prepare request", e)
            })?;

            let last_attempt = attempt >= self.config.max_attempts;

            match self.execute(request).await {
                Ok(response) if response.status.is_server_error() && !last_attempt => {
                    tracing::debug!(
                        "Request to {} returned {}, retrying",
                        url,
                        response.status.as_u16()
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if !last_attempt => {
                    tracing::debug!("Request to {} failed: {}", url, e);
                }
                Err(e) => return Err(e),
            }

            let delay = self.config.calculate_delay(attempt);
            tracing::debug!(
                "Retry attempt {} of {}, waiting {:?}",
                attempt,
                self.config.max_attempts,
                delay
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    async fn execute(&self, request: reqwest::Request) -> Result<ApiResponse> {
        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| EventsError::transport("Request failed", e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| EventsError::transport("Failed to read response body", e))?;

        Ok(ApiResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.base_delay_ms, 100);
        assert_eq!(config.backoff_multiplier, 2.0);
        assert_eq!(config.jitter_ratio, 0.2);
    }

    #[test]
    fn test_builder() {
        let config = RetryConfig::builder()
            .max_attempts(3)
            .base_delay_ms(10)
            .backoff_multiplier(3.0)
            .jitter_ratio(0.0)
            .build();

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay_ms, 10);
        assert_eq!(config.backoff_multiplier, 3.0);
        assert_eq!(config.jitter_ratio, 0.0);
    }

    #[test]
    fn test_jitter_ratio_clamping() {
        let config = RetryConfig::builder().jitter_ratio(1.5).build();
        assert_eq!(config.jitter_ratio, 1.0);
    }

    #[test]
    fn test_base_delay_exponential() {
        let config = RetryConfig::default();
        assert_eq!(config.base_delay(0).as_millis(), 100);
        assert_eq!(config.base_delay(1).as_millis(), 200);
        assert_eq!(config.base_delay(3).as_millis(), 800);
        assert_eq!(config.base_delay(5).as_millis(), 3200);
    }

    #[test]
    fn test_base_delay_is_non_decreasing() {
        let config = RetryConfig::default();
        for attempt in 0..10 {
            assert!(config.base_delay(attempt) <= config.base_delay(attempt + 1));
        }
    }

    #[test]
    fn test_backoff_stays_within_jitter_bounds() {
        let config = RetryConfig::default();
        for attempt in 0..6 {
            let base = config.base_delay(attempt).as_millis();
            for _ in 0..50 {
                let delay = backoff(attempt).as_millis();
                assert!(delay >= base, "attempt {}: {} < {}", attempt, delay, base);
                assert!(delay <= base + base / 5, "attempt {}: {} too large", attempt, delay);
            }
        }
    }

    #[test]
    fn test_no_jitter_is_deterministic() {
        let config = RetryConfig::builder().jitter_ratio(0.0).build();
        assert_eq!(config.calculate_delay(2), config.base_delay(2));
    }
}
