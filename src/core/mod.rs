mod config;
mod event_queue;
mod reporting;

pub use config::{
    EngineQueueOptions, EventsOptions, EventsOptionsBuilder, DEFAULT_BASE_PATH,
    DEFAULT_EVENTS_API_BASE_PATH, DEFAULT_EVENT_FLUSH_INTERVAL, DEFAULT_EVENT_REQUEST_CHUNK_SIZE,
    DEFAULT_FLUSH_EVENT_QUEUE_SIZE, DEFAULT_MAX_EVENT_QUEUE_SIZE, DEFAULT_REQUEST_TIMEOUT,
};
pub use event_queue::{EventQueue, QueueMetrics};
pub use reporting::{FlushResult, ImmediateReporter, OutcomeReporter, PayloadOutcome};
