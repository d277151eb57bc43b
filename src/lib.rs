//! FlagKit Events
//!
//! Event queue and delivery pipeline for the FlagKit server SDK.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use flagkit_events::{Actor, Event, EventsClient, EventsOptions, LocalEngine, StaticEnginePool};
//!
//! #[tokio::main]
//! async fn main() -> flagkit_events::Result<()> {
//!     let client = EventsClient::new(
//!         "dvc_server_your_sdk_key",
//!         EventsOptions::default(),
//!         Some(Arc::new(LocalEngine::new())),
//!         Arc::new(StaticEnginePool::empty()),
//!     )?;
//!
//!     // Buffered and delivered on the next flush
//!     let actor = Actor::new("user-123");
//!     client.track(&actor, &Event::custom("checkout").value(42.0)).await?;
//!
//!     // Stop the flush task and deliver what is left
//!     client.close().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod engine;
pub mod error;
pub mod http;
pub mod types;
mod client;

pub use types::{
    Actor, BucketedConfig, Event, FeatureVariation, FlushPayload, AGG_VARIABLE_DEFAULTED,
    AGG_VARIABLE_EVALUATED,
};

pub use error::{ErrorCode, EventsError, Result};

pub use core::{
    EventQueue, EventsOptions, EventsOptionsBuilder, FlushResult, OutcomeReporter,
    PayloadOutcome, QueueMetrics,
};

pub use engine::{EnginePool, EvaluationEngine, LocalEngine, PoolOperation, StaticEnginePool};

pub use http::{Dispatcher, RetryConfig, RetryingExecutor};

pub use client::{handle_error, validate_sdk_key, EventsClient, TRACK_PATH};
