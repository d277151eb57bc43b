//! Delivery of drained payloads to the events API.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};

use crate::core::{EventsOptions, OutcomeReporter, PayloadOutcome};
use crate::error::{ErrorCode, EventsError, Result};
use crate::types::{BatchEventsBody, FlushPayload};

pub const EVENTS_BATCH_PATH: &str = "/v1/events/batch";

/// Sends payloads to `POST {events_api_base_path}/v1/events/batch`.
///
/// The dispatcher never retries inline. A retryable outcome is reported back
/// to the engine, which puts the records into a later payload.
pub struct Dispatcher {
    client: Client,
    events_url: String,
    sdk_key: String,
}

impl Dispatcher {
    pub fn new(options: &EventsOptions, sdk_key: impl Into<String>) -> Result<Self> {
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
            events_url: format!(
                "{}{}",
                options.events_api_base_path.trim_end_matches('/'),
                EVENTS_BATCH_PATH
            ),
            sdk_key: sdk_key.into(),
        })
    }

    pub fn events_url(&self) -> &str {
        &self.events_url
    }

    /// Send one payload. `Ok` only for a `201 Created` response.
    pub async fn send(&self, payload: &FlushPayload) -> Result<()> {
        let body = serde_json::to_vec(&BatchEventsBody {
            batch: &payload.records,
        })
        .map_err(|e| {
            tracing::error!("Failed to marshal batch events body: {}", e);
            EventsError::serialization("Failed to marshal batch events body", e)
        })?;

        let response = self
            .client
            .post(&self.events_url)
            .header(AUTHORIZATION, &self.sdk_key)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to make request to events api: {}", e);
                EventsError::transport("Failed to make request to events api", e)
            })?;

        // Read the body to the end on every path so the connection goes back
        // to the pool.
        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            tracing::error!("Failed to read response body: {}", e);
            EventsError::transport("Failed to read response body", e)
        })?;

        classify_response(status, &body)
    }

    /// Send every payload and report each outcome as it is known.
    ///
    /// One payload failing never stops the others from being attempted.
    /// Returns the number of payloads the server accepted.
    pub async fn send_all(
        &self,
        payloads: &[FlushPayload],
        reporter: &mut (dyn OutcomeReporter + Send),
    ) -> usize {
        let mut delivered = 0;

        for payload in payloads {
            let result = self.send(payload).await;
            let outcome = PayloadOutcome::from_send(&result);
            if outcome == PayloadOutcome::Succeeded {
                delivered += 1;
            }
            reporter.report(&payload.payload_id, outcome);
        }

        delivered
    }
}

/// Map an events API response onto the delivery error taxonomy.
pub fn classify_response(status: StatusCode, body: &[u8]) -> Result<()> {
    let body = String::from_utf8_lossy(body);

    if status.is_server_error() {
        tracing::warn!("Events API returned a {} error, retrying later.", status.as_u16());
        return Err(EventsError::server(status.as_u16(), &body));
    }

    if status.is_client_error() {
        tracing::error!("Error sending events - Response: {}", body);
        return Err(EventsError::client(status.as_u16(), &body));
    }

    if status == StatusCode::CREATED {
        return Ok(());
    }

    tracing::error!("Unknown status code when flushing events: {}", status.as_u16());
    Err(EventsError::new(
        ErrorCode::UnexpectedStatus,
        format!("Unexpected status code {}", status.as_u16()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_url() {
        let options = EventsOptions::builder()
            .events_api_base_path("http://localhost:9000/")
            .build();
        let dispatcher = Dispatcher::new(&options, "dvc_server_key").unwrap();
        assert_eq!(dispatcher.events_url(), "http://localhost:9000/v1/events/batch");
    }

    #[test]
    fn test_classify_created_is_success() {
        assert!(classify_response(StatusCode::CREATED, b"").is_ok());
    }

    #[test]
    fn test_classify_server_error_is_retryable() {
        let err = classify_response(StatusCode::SERVICE_UNAVAILABLE, b"down").unwrap_err();
        assert_eq!(err.code, ErrorCode::ServerError);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_client_error_is_permanent() {
        let err = classify_response(StatusCode::BAD_REQUEST, b"{\"message\":\"bad\"}").unwrap_err();
        assert_eq!(err.code, ErrorCode::ClientError);
        assert!(err.message.contains("bad"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_other_success_codes_are_unexpected() {
        for status in [StatusCode::OK, StatusCode::ACCEPTED, StatusCode::NO_CONTENT, StatusCode::FOUND] {
            let err = classify_response(status, b"").unwrap_err();
            assert_eq!(err.code, ErrorCode::UnexpectedStatus);
            assert!(!err.is_retryable());
        }
    }
}
