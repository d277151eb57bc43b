//! Event queue orchestrating buffering, flushing and delivery.
//!
//! The queue holds no events itself. Producers' events are serialized and
//! handed to the primary [`EvaluationEngine`]; flushes drain that engine and
//! every member of the [`EnginePool`], send each payload through the
//! [`Dispatcher`] and report the outcomes back to the engine that produced
//! the payload.
//!
//! A flush runs when:
//! - the flush interval elapses
//! - a producer call finds the buffer at the flush threshold
//! - `flush_events()` is called
//! - the queue is closed

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::config::EventsOptions;
use super::reporting::{FlushResult, ImmediateReporter};
use crate::engine::{EnginePool, EvaluationEngine, PoolOperation};
use crate::error::{ErrorCode, EventsError, Result};
use crate::http::Dispatcher;
use crate::types::{Actor, BucketedConfig, Event};

/// Snapshot of the queue's delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueMetrics {
    /// Payloads drained from any engine.
    pub events_flushed: u64,
    /// Payloads the events API accepted.
    pub events_reported: u64,
}

/// Keeps an engine inside its flush bracket for the guard's lifetime.
struct FlushBracket<'a> {
    engine: &'a dyn EvaluationEngine,
}

impl<'a> FlushBracket<'a> {
    fn begin(engine: &'a dyn EvaluationEngine) -> Self {
        engine.begin_flush();
        Self { engine }
    }
}

impl Drop for FlushBracket<'_> {
    fn drop(&mut self) {
        self.engine.end_flush();
    }
}

struct QueueInner {
    options: EventsOptions,
    engine: Arc<dyn EvaluationEngine>,
    pool: Arc<dyn EnginePool>,
    dispatcher: Dispatcher,
    closed: AtomicBool,
    /// Producers hold it shared from the closed check to the enqueue;
    /// `close` takes it exclusively to flip `closed`.
    admission: RwLock<()>,
    /// Held for a whole flush so at most one drain runs at a time.
    flush_lock: tokio::sync::Mutex<()>,
    events_flushed: AtomicU64,
    events_reported: AtomicU64,
}

impl QueueInner {
    fn serialize<T: serde::Serialize>(kind: &str, value: &T) -> Result<String> {
        serde_json::to_string(value)
            .map_err(|e| EventsError::serialization(format!("Failed to serialize {}", kind), e))
    }

    /// Returns `true` when the event about to be queued must be dropped.
    async fn check_event_queue_size(&self) -> Result<bool> {
        let queue_size = self.engine.event_queue_size()?;
        if queue_size + 1 < self.options.flush_event_queue_size {
            return Ok(false);
        }

        if let Err(e) = self.flush_events().await {
            tracing::warn!("Error flushing events at queue threshold: {}", e);
        }

        let queue_size = self.engine.event_queue_size()?;
        Ok(queue_size >= self.options.max_event_queue_size)
    }

    async fn flush_events(&self) -> Result<()> {
        let _flushing = self.flush_lock.lock().await;
        tracing::debug!("Started flushing events");

        self.flush_primary().await?;

        let result = if self.pool.is_empty() {
            Ok(())
        } else {
            self.pool
                .for_each("flush_events", &PoolFlush { queue: self })
                .await
        };

        tracing::debug!("Finished flushing events");
        result
    }

    async fn flush_primary(&self) -> Result<()> {
        let engine = self.engine.as_ref();
        let _bracket = FlushBracket::begin(engine);

        let payloads = engine.drain_batches()?;
        if payloads.is_empty() {
            return Ok(());
        }
        self.events_flushed
            .fetch_add(payloads.len() as u64, Ordering::SeqCst);

        let mut reporter = ImmediateReporter::new(engine);
        let delivered = self.dispatcher.send_all(&payloads, &mut reporter).await;
        self.events_reported
            .fetch_add(delivered as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn flush_member(&self, engine: Arc<dyn EvaluationEngine>) -> Result<()> {
        let _bracket = FlushBracket::begin(engine.as_ref());

        let payloads = engine.drain_batches()?;
        if payloads.is_empty() {
            return Ok(());
        }
        self.events_flushed
            .fetch_add(payloads.len() as u64, Ordering::SeqCst);

        let mut result = FlushResult::new();
        let delivered = self.dispatcher.send_all(&payloads, &mut result).await;
        self.events_reported
            .fetch_add(delivered as u64, Ordering::SeqCst);

        engine.handle_flush_results(&result)
    }
}

/// Drain, dispatch and report for one pool member, with a single
/// aggregated report at the end.
struct PoolFlush<'q> {
    queue: &'q QueueInner,
}

impl PoolOperation for PoolFlush<'_> {
    fn run<'a>(&'a self, engine: Arc<dyn EvaluationEngine>) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.queue.flush_member(engine))
    }
}

/// Event queue for batching and delivering usage events.
pub struct EventQueue {
    inner: Arc<QueueInner>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl EventQueue {
    /// Wire the engine's buffer and start the background flush task.
    ///
    /// No task is started when both automatic and custom event logging are
    /// disabled. Otherwise this must be called from within a Tokio runtime.
    pub fn initialize(
        options: EventsOptions,
        sdk_key: impl Into<String>,
        engine: Arc<dyn EvaluationEngine>,
        pool: Arc<dyn EnginePool>,
    ) -> Result<Self> {
        options.validate()?;
        let dispatcher = Dispatcher::new(&options, sdk_key)?;

        let engine_options = QueueInner::serialize("event queue options", &options.engine_queue_options())?;
        engine.init_event_queue(&engine_options).map_err(|e| {
            EventsError::with_source(
                ErrorCode::InitializationError,
                "Error initializing engine event queue",
                e,
            )
        })?;

        let events_disabled = options.events_disabled();
        let queue = Self {
            inner: Arc::new(QueueInner {
                options,
                engine,
                pool,
                dispatcher,
                closed: AtomicBool::new(false),
                admission: RwLock::new(()),
                flush_lock: tokio::sync::Mutex::new(()),
                events_flushed: AtomicU64::new(0),
                events_reported: AtomicU64::new(0),
            }),
            shutdown_tx: Mutex::new(None),
            flush_task: Mutex::new(None),
        };

        if events_disabled {
            tracing::debug!("Event logging disabled, not starting the flush task");
            return Ok(queue);
        }

        queue.start()?;
        Ok(queue)
    }

    fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            EventsError::with_source(
                ErrorCode::InitializationError,
                "Event queue requires a Tokio runtime",
                e,
            )
        })?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let inner = Arc::clone(&self.inner);
        let period = inner.options.flush_interval;

        let handle = runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Stopping event flushing");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = inner.flush_events().await {
                            tracing::warn!("Error flushing primary events queue: {}", e);
                        }
                    }
                }
            }
        });

        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.flush_task.lock() = Some(handle);

        tracing::debug!("Event queue started with flush interval {:?}", period);
        Ok(())
    }

    /// Queue an event for `actor`.
    ///
    /// Fails with `Closed` after [`close`](Self::close), `QueueFull` when the
    /// buffer is at its cap even after a flush, and `SerializationError`
    /// when the actor or event cannot be encoded. A rejected event is
    /// dropped.
    pub async fn queue_event(&self, actor: &Actor, event: &Event) -> Result<()> {
        let _admitted = self.inner.admission.read().await;
        if self.is_closed() {
            return Err(EventsError::closed());
        }

        if self.inner.check_event_queue_size().await? {
            tracing::warn!("Max event queue size reached, dropping event");
            return Err(EventsError::queue_full());
        }

        let actor = QueueInner::serialize("actor", actor)?;
        let event = QueueInner::serialize("event", event)?;
        self.inner.engine.queue_event(&actor, &event)
    }

    /// Queue an event counted against a previously computed evaluation.
    pub async fn queue_aggregate_event(&self, config: &BucketedConfig, event: &Event) -> Result<()> {
        let _admitted = self.inner.admission.read().await;
        if self.is_closed() {
            return Err(EventsError::closed());
        }

        if self.inner.check_event_queue_size().await? {
            tracing::warn!("Max event queue size reached, dropping aggregate event");
            return Err(EventsError::queue_full());
        }

        let event = QueueInner::serialize("event", event)?;
        self.inner.engine.queue_aggregate_event(&event, config)
    }

    /// Drain and deliver everything buffered in the primary engine and the pool.
    pub async fn flush_events(&self) -> Result<()> {
        self.inner.flush_events().await
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            events_flushed: self.inner.events_flushed.load(Ordering::SeqCst),
            events_reported: self.inner.events_reported.load(Ordering::SeqCst),
        }
    }

    /// Buffered count reported by the primary engine.
    pub fn queue_size(&self) -> Result<usize> {
        self.inner.engine.event_queue_size()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Whether the background flush task is running.
    pub fn is_running(&self) -> bool {
        self.flush_task
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the flush task, reject further events and flush one last time.
    ///
    /// Producers already past the closed check finish enqueueing first, so
    /// the final flush sees their events. Returns the final flush's error.
    /// Only the first call stops the task; a later call just flushes again.
    pub async fn close(&self) -> Result<()> {
        let shutdown_tx = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(()).await;
        }

        {
            let _exclusive = self.inner.admission.write().await;
            self.inner.closed.store(true, Ordering::SeqCst);
        }

        let flush_task = self.flush_task.lock().take();
        if let Some(handle) = flush_task {
            if let Err(e) = handle.await {
                tracing::warn!("Event flush task ended abnormally: {}", e);
            }
        }

        self.inner.flush_events().await
    }
}
