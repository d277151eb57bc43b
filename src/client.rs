use reqwest::Method;
use std::sync::Arc;

use crate::core::{EventQueue, EventsOptions, QueueMetrics};
use crate::engine::{EnginePool, EvaluationEngine};
use crate::error::{ErrorCode, EventsError, Result};
use crate::http::{ApiResponse, RetryingExecutor};
use crate::types::{
    Actor, BucketedConfig, ErrorResponse, Event, UserDataAndEventsBody, AGG_VARIABLE_DEFAULTED,
    AGG_VARIABLE_EVALUATED,
};

pub const TRACK_PATH: &str = "/v1/track";

const SDK_KEY_PREFIXES: [&str; 2] = ["server", "dvc_server"];

/// How events leave the process.
enum Delivery {
    /// Buffered in an engine and flushed in batches.
    Queued(EventQueue),
    /// Sent one call at a time, bypassing the queue.
    Cloud(RetryingExecutor),
}

/// Entry point for tracking events.
///
/// In local mode events go through the [`EventQueue`]; with cloud bucketing
/// enabled every `track` call is a direct request to the API.
pub struct EventsClient {
    options: EventsOptions,
    delivery: Delivery,
}

impl EventsClient {
    pub fn new(
        sdk_key: impl Into<String>,
        options: EventsOptions,
        engine: Option<Arc<dyn EvaluationEngine>>,
        pool: Arc<dyn EnginePool>,
    ) -> Result<Self> {
        let sdk_key = sdk_key.into();
        validate_sdk_key(&sdk_key)?;
        options.validate()?;

        let delivery = if options.enable_cloud_bucketing {
            Delivery::Cloud(RetryingExecutor::new(&options, sdk_key)?)
        } else {
            let engine = engine.ok_or_else(|| {
                EventsError::initialization("Local bucketing requires an evaluation engine")
            })?;
            Delivery::Queued(EventQueue::initialize(options.clone(), sdk_key, engine, pool)?)
        };

        Ok(Self { options, delivery })
    }

    pub fn options(&self) -> &EventsOptions {
        &self.options
    }

    /// The event queue, absent in cloud mode.
    pub fn event_queue(&self) -> Option<&EventQueue> {
        match &self.delivery {
            Delivery::Queued(queue) => Some(queue),
            Delivery::Cloud(_) => None,
        }
    }

    /// Track a custom event.
    ///
    /// Returns whether the event was accepted. With custom event logging
    /// disabled the event is discarded and `Ok(true)` returned.
    pub async fn track(&self, actor: &Actor, event: &Event) -> Result<bool> {
        if self.options.disable_custom_event_logging {
            return Ok(true);
        }
        if event.kind.is_empty() {
            return Err(EventsError::new(ErrorCode::InvalidEvent, "event type is required"));
        }

        match &self.delivery {
            Delivery::Queued(queue) => {
                queue.queue_event(actor, event).await?;
                Ok(true)
            }
            Delivery::Cloud(executor) => {
                let body = UserDataAndEventsBody {
                    user: actor,
                    events: vec![event],
                };
                let url = format!("{}{}", self.options.base_path.trim_end_matches('/'), TRACK_PATH);
                let response = executor
                    .perform_request(Method::POST, &url, Some(&body), &[])
                    .await?;

                if response.is_success() {
                    return Ok(true);
                }
                handle_error(&response).map(|()| false)
            }
        }
    }

    /// Count a variable evaluation against the config it was served from.
    pub async fn track_evaluation(
        &self,
        config: &BucketedConfig,
        variable_key: &str,
        defaulted: bool,
    ) -> Result<()> {
        if self.options.disable_automatic_event_logging {
            return Ok(());
        }

        let Delivery::Queued(queue) = &self.delivery else {
            return Ok(());
        };

        let kind = if defaulted {
            AGG_VARIABLE_DEFAULTED
        } else {
            AGG_VARIABLE_EVALUATED
        };
        let event = Event::custom(kind).target(variable_key);
        queue.queue_aggregate_event(config, &event).await
    }

    pub async fn flush_events(&self) -> Result<()> {
        if self.options.events_disabled() {
            return Ok(());
        }

        match &self.delivery {
            Delivery::Queued(queue) => queue.flush_events().await,
            Delivery::Cloud(_) => Ok(()),
        }
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.event_queue()
            .map(EventQueue::metrics)
            .unwrap_or_default()
    }

    /// Close the event queue, flushing whatever is still buffered.
    pub async fn close(&self) -> Result<()> {
        match &self.delivery {
            Delivery::Queued(queue) => queue.close().await,
            Delivery::Cloud(_) => Ok(()),
        }
    }
}

pub fn validate_sdk_key(sdk_key: &str) -> Result<()> {
    if sdk_key.is_empty() {
        return Err(EventsError::new(
            ErrorCode::InvalidSdkKey,
            "Missing SDK key! Create the client with a valid server SDK key.",
        ));
    }

    if !SDK_KEY_PREFIXES.iter().any(|p| sdk_key.starts_with(p)) {
        return Err(EventsError::new(
            ErrorCode::InvalidSdkKey,
            "Invalid SDK key. Create the client with a valid server SDK key.",
        ));
    }

    Ok(())
}

/// Turn a non-2xx response into an error.
///
/// 5xx responses are logged and not reported as errors.
pub fn handle_error(response: &ApiResponse) -> Result<()> {
    let status = response.status.as_u16();
    let mut message = response.status.to_string();

    if !response.body.is_empty() {
        let decoded: ErrorResponse = serde_json::from_slice(&response.body).map_err(|e| {
            EventsError::decode(format!("Failed to decode {} error response", status), e)
        })?;
        message = decoded.message;
    }

    if response.status.is_server_error() {
        tracing::error!("Request error: {} - {}", status, message);
        return Ok(());
    }

    Err(EventsError::client(status, &message))
}
