use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{EventsError, Result};

pub const DEFAULT_EVENT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_FLUSH_EVENT_QUEUE_SIZE: usize = 1000;
pub const DEFAULT_MAX_EVENT_QUEUE_SIZE: usize = 2000;
pub const DEFAULT_EVENT_REQUEST_CHUNK_SIZE: usize = 100;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EVENTS_API_BASE_PATH: &str = "https://events.flagkit.dev";
pub const DEFAULT_BASE_PATH: &str = "https://bucketing.flagkit.dev";

#[derive(Debug, Clone)]
pub struct EventsOptions {
    pub flush_interval: Duration,
    /// Buffered count at which a producer call triggers a flush.
    pub flush_event_queue_size: usize,
    /// Buffered count at which new events are dropped.
    pub max_event_queue_size: usize,
    pub event_request_chunk_size: usize,
    pub disable_automatic_event_logging: bool,
    pub disable_custom_event_logging: bool,
    pub enable_cloud_bucketing: bool,
    pub events_api_base_path: String,
    pub base_path: String,
    pub request_timeout: Duration,
}

impl Default for EventsOptions {
    fn default() -> Self {
        Self {
            flush_interval: DEFAULT_EVENT_FLUSH_INTERVAL,
            flush_event_queue_size: DEFAULT_FLUSH_EVENT_QUEUE_SIZE,
            max_event_queue_size: DEFAULT_MAX_EVENT_QUEUE_SIZE,
            event_request_chunk_size: DEFAULT_EVENT_REQUEST_CHUNK_SIZE,
            disable_automatic_event_logging: false,
            disable_custom_event_logging: false,
            enable_cloud_bucketing: false,
            events_api_base_path: DEFAULT_EVENTS_API_BASE_PATH.to_string(),
            base_path: DEFAULT_BASE_PATH.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl EventsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> EventsOptionsBuilder {
        EventsOptionsBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.flush_interval.is_zero() {
            return Err(EventsError::config("Event flush interval must be positive"));
        }

        if self.event_request_chunk_size == 0 {
            return Err(EventsError::config("Event request chunk size must be positive"));
        }

        if self.max_event_queue_size < self.flush_event_queue_size {
            return Err(EventsError::config(format!(
                "Max event queue size ({}) must be at least the flush threshold ({})",
                self.max_event_queue_size, self.flush_event_queue_size
            )));
        }

        for (name, path) in [
            ("events API base path", &self.events_api_base_path),
            ("base path", &self.base_path),
        ] {
            if !(path.starts_with("http://") || path.starts_with("https://")) {
                return Err(EventsError::config(format!("Invalid {}: {}", name, path)));
            }
        }

        Ok(())
    }

    /// Both kinds of event logging are off, so nothing will ever be buffered.
    pub fn events_disabled(&self) -> bool {
        self.disable_automatic_event_logging && self.disable_custom_event_logging
    }

    /// The startup options handed to an engine's event queue.
    pub fn engine_queue_options(&self) -> EngineQueueOptions {
        EngineQueueOptions {
            flush_events_ms: self.flush_interval.as_millis() as u64,
            disable_automatic_event_logging: self.disable_automatic_event_logging,
            disable_custom_event_logging: self.disable_custom_event_logging,
            max_event_queue_size: self.max_event_queue_size,
            flush_event_queue_size: self.flush_event_queue_size,
            event_request_chunk_size: self.event_request_chunk_size,
        }
    }
}

/// Serialized form of the options an engine needs to run its buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineQueueOptions {
    #[serde(rename = "flushEventsMS")]
    pub flush_events_ms: u64,
    pub disable_automatic_event_logging: bool,
    pub disable_custom_event_logging: bool,
    pub max_event_queue_size: usize,
    pub flush_event_queue_size: usize,
    pub event_request_chunk_size: usize,
}

pub struct EventsOptionsBuilder {
    options: EventsOptions,
}

impl EventsOptionsBuilder {
    pub fn new() -> Self {
        Self {
            options: EventsOptions::default(),
        }
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.options.flush_interval = interval;
        self
    }

    pub fn flush_event_queue_size(mut self, size: usize) -> Self {
        self.options.flush_event_queue_size = size;
        self
    }

    pub fn max_event_queue_size(mut self, size: usize) -> Self {
        self.options.max_event_queue_size = size;
        self
    }

    pub fn event_request_chunk_size(mut self, size: usize) -> Self {
        self.options.event_request_chunk_size = size;
        self
    }

    pub fn disable_automatic_event_logging(mut self, disabled: bool) -> Self {
        self.options.disable_automatic_event_logging = disabled;
        self
    }

    pub fn disable_custom_event_logging(mut self, disabled: bool) -> Self {
        self.options.disable_custom_event_logging = disabled;
        self
    }

    pub fn enable_cloud_bucketing(mut self, enabled: bool) -> Self {
        self.options.enable_cloud_bucketing = enabled;
        self
    }

    pub fn events_api_base_path(mut self, path: impl Into<String>) -> Self {
        self.options.events_api_base_path = path.into();
        self
    }

    pub fn base_path(mut self, path: impl Into<String>) -> Self {
        self.options.base_path = path.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.options.request_timeout = timeout;
        self
    }

    pub fn build(self) -> EventsOptions {
        self.options
    }
}

impl Default for EventsOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = EventsOptions::default();
        assert_eq!(options.flush_interval, Duration::from_secs(30));
        assert_eq!(options.flush_event_queue_size, 1000);
        assert_eq!(options.max_event_queue_size, 2000);
        assert_eq!(options.event_request_chunk_size, 100);
        assert!(!options.enable_cloud_bucketing);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_hard_cap_below_soft_threshold() {
        let options = EventsOptions::builder()
            .flush_event_queue_size(20)
            .max_event_queue_size(10)
            .build();
        let err = options.validate().unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::ConfigInvalid);
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let options = EventsOptions::builder()
            .flush_interval(Duration::ZERO)
            .build();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_http_base_path() {
        let options = EventsOptions::builder()
            .events_api_base_path("ftp://events")
            .build();
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_engine_queue_options_json() {
        let options = EventsOptions::builder()
            .flush_interval(Duration::from_millis(500))
            .flush_event_queue_size(10)
            .max_event_queue_size(20)
            .disable_custom_event_logging(true)
            .build();

        let json = serde_json::to_value(options.engine_queue_options()).unwrap();
        assert_eq!(json["flushEventsMS"], 500);
        assert_eq!(json["flushEventQueueSize"], 10);
        assert_eq!(json["maxEventQueueSize"], 20);
        assert_eq!(json["disableCustomEventLogging"], true);
        assert_eq!(json["disableAutomaticEventLogging"], false);
        assert_eq!(json["eventRequestChunkSize"], 100);
    }

    #[test]
    fn test_events_disabled_requires_both_flags() {
        let only_custom = EventsOptions::builder()
            .disable_custom_event_logging(true)
            .build();
        assert!(!only_custom.events_disabled());

        let both = EventsOptions::builder()
            .disable_custom_event_logging(true)
            .disable_automatic_event_logging(true)
            .build();
        assert!(both.events_disabled());
    }
}
