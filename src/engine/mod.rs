//! Evaluation engine collaborators.
//!
//! The event queue never owns an event buffer. It talks to an
//! [`EvaluationEngine`], which buffers serialized events, cuts them into
//! [`FlushPayload`]s on drain and keeps track of every payload until it is
//! acknowledged. Additional engines (one per isolated evaluation context)
//! are reached through an [`EnginePool`].

mod local;

pub use local::LocalEngine;

use futures::future::BoxFuture;
use std::sync::Arc;

use crate::core::FlushResult;
use crate::error::Result;
use crate::types::{BucketedConfig, FlushPayload};

/// The buffer-owning side of the event pipeline.
///
/// Implementations must be safe to call from many tasks at once: producers
/// enqueue while the flush task drains. Draining is always bracketed by
/// [`begin_flush`](Self::begin_flush) and [`end_flush`](Self::end_flush).
pub trait EvaluationEngine: Send + Sync {
    /// Configure the engine's buffer from the serialized startup options.
    fn init_event_queue(&self, options: &str) -> Result<()>;

    /// Buffer one event for `actor`. Both arguments are JSON documents.
    fn queue_event(&self, actor: &str, event: &str) -> Result<()>;

    /// Count `event` against an already computed evaluation result.
    fn queue_aggregate_event(&self, event: &str, config: &BucketedConfig) -> Result<()>;

    /// Number of buffered events not yet drained.
    fn event_queue_size(&self) -> Result<usize>;

    fn begin_flush(&self);

    fn end_flush(&self);

    /// Atomically move everything buffered into payloads.
    fn drain_batches(&self) -> Result<Vec<FlushPayload>>;

    fn on_payload_success(&self, payload_id: &str) -> Result<()>;

    /// Retire the payload, or return its content to the buffer when `retry`.
    fn on_payload_failure(&self, payload_id: &str, retry: bool) -> Result<()>;

    /// Apply every outcome of a flush cycle in one call.
    ///
    /// The default falls back to the per-payload calls. Every payload is
    /// reported even when an earlier report fails; the first failure is
    /// returned.
    fn handle_flush_results(&self, result: &FlushResult) -> Result<()> {
        let mut first_error = None;

        let reports = result
            .success
            .iter()
            .map(|id| self.on_payload_success(id))
            .chain(result.failure.iter().map(|id| self.on_payload_failure(id, false)))
            .chain(
                result
                    .failure_with_retry
                    .iter()
                    .map(|id| self.on_payload_failure(id, true)),
            );

        for report in reports {
            if let Err(e) = report {
                tracing::error!("Failed to report payload outcome: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Work applied to each member of an [`EnginePool`].
pub trait PoolOperation: Send + Sync {
    fn run<'a>(&'a self, engine: Arc<dyn EvaluationEngine>) -> BoxFuture<'a, Result<()>>;
}

/// A set of additional engines flushed the same way as the primary one.
pub trait EnginePool: Send + Sync {
    /// Run `operation` against every member.
    ///
    /// A failing member must not stop the remaining members from being
    /// processed.
    fn for_each<'a>(
        &'a self,
        label: &'a str,
        operation: &'a dyn PoolOperation,
    ) -> BoxFuture<'a, Result<()>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A fixed list of engines.
#[derive(Default)]
pub struct StaticEnginePool {
    members: Vec<Arc<dyn EvaluationEngine>>,
}

impl StaticEnginePool {
    pub fn new(members: Vec<Arc<dyn EvaluationEngine>>) -> Self {
        Self { members }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn push(&mut self, engine: Arc<dyn EvaluationEngine>) {
        self.members.push(engine);
    }
}

impl EnginePool for StaticEnginePool {
    fn for_each<'a>(
        &'a self,
        label: &'a str,
        operation: &'a dyn PoolOperation,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut first_error = None;

            for (index, engine) in self.members.iter().enumerate() {
                if let Err(e) = operation.run(Arc::clone(engine)).await {
                    tracing::warn!("{} failed for pool member {}: {}", label, index, e);
                    first_error.get_or_insert(e);
                }
            }

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        })
    }

    fn len(&self) -> usize {
        self.members.len()
    }
}
