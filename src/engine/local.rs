//! In-process evaluation engine.
//!
//! Keeps the event buffer in memory behind its own lock. Custom events are
//! buffered as one record per event; aggregate events are merged by
//! `(type, target)` until the next drain.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::EvaluationEngine;
use crate::core::EngineQueueOptions;
use crate::error::{ErrorCode, EventsError, Result};
use crate::types::{BucketedConfig, FlushPayload};

/// User id aggregate records are reported under.
pub const AGGREGATE_USER_ID: &str = "aggregate";

#[derive(Debug)]
struct AggregateEntry {
    event: Value,
    count: f64,
}

#[derive(Debug, Default)]
struct LocalEngineState {
    options: Option<EngineQueueOptions>,
    pending: VecDeque<Value>,
    aggregates: BTreeMap<(String, String), AggregateEntry>,
    in_flight: HashMap<String, FlushPayload>,
}

impl LocalEngineState {
    fn options(&self, operation: &str) -> Result<&EngineQueueOptions> {
        self.options
            .as_ref()
            .ok_or_else(|| EventsError::not_initialized(operation))
    }
}

#[derive(Debug, Default)]
pub struct LocalEngine {
    state: Mutex<LocalEngineState>,
    flush_depth: AtomicUsize,
}

impl LocalEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of drained payloads still awaiting an outcome.
    pub fn in_flight_count(&self) -> usize {
        self.state.lock().in_flight.len()
    }

    pub fn is_flushing(&self) -> bool {
        self.flush_depth.load(Ordering::SeqCst) > 0
    }

    fn parse(kind: &str, raw: &str) -> Result<Value> {
        serde_json::from_str(raw)
            .map_err(|e| EventsError::serialization(format!("Invalid {} JSON", kind), e))
    }

    fn record(actor: Value, event: Value) -> Value {
        json!({ "user": actor, "events": [event] })
    }
}

impl EvaluationEngine for LocalEngine {
    fn init_event_queue(&self, options: &str) -> Result<()> {
        let parsed: EngineQueueOptions = serde_json::from_str(options).map_err(|e| {
            EventsError::with_source(
                ErrorCode::InitializationError,
                "Invalid event queue options",
                e,
            )
        })?;

        if parsed.event_request_chunk_size == 0 {
            return Err(EventsError::initialization(
                "eventRequestChunkSize must be positive",
            ));
        }

        self.state.lock().options = Some(parsed);
        Ok(())
    }

    fn queue_event(&self, actor: &str, event: &str) -> Result<()> {
        let actor = Self::parse("actor", actor)?;
        let event = Self::parse("event", event)?;

        let mut state = self.state.lock();
        state.options("queue_event")?;
        state.pending.push_back(Self::record(actor, event));
        Ok(())
    }

    fn queue_aggregate_event(&self, event: &str, config: &BucketedConfig) -> Result<()> {
        let mut event = Self::parse("event", event)?;

        let kind = event
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                EventsError::new(ErrorCode::InvalidEvent, "Aggregate event has no type")
            })?;
        let target = event
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let increment = event.get("value").and_then(Value::as_f64).unwrap_or(1.0);

        let mut state = self.state.lock();
        if state.options("queue_aggregate_event")?.disable_automatic_event_logging {
            return Ok(());
        }

        if let Some(variation) = config.variable_variation_map.get(&target) {
            if let Some(meta) = event.as_object_mut() {
                let entry = meta.entry("metaData").or_insert_with(|| json!({}));
                if let Some(meta_data) = entry.as_object_mut() {
                    let mut feature_vars = serde_json::Map::new();
                    feature_vars.insert(
                        variation.feature.clone(),
                        Value::String(variation.variation.clone()),
                    );
                    meta_data.insert("featureVars".to_string(), Value::Object(feature_vars));
                }
            }
        }

        state
            .aggregates
            .entry((kind, target))
            .and_modify(|entry| entry.count += increment)
            .or_insert(AggregateEntry {
                event,
                count: increment,
            });
        Ok(())
    }

    fn event_queue_size(&self) -> Result<usize> {
        let state = self.state.lock();
        state.options("event_queue_size")?;
        Ok(state.pending.len() + state.aggregates.len())
    }

    fn begin_flush(&self) {
        self.flush_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn end_flush(&self) {
        let _ = self
            .flush_depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |depth| depth.checked_sub(1));
    }

    fn drain_batches(&self) -> Result<Vec<FlushPayload>> {
        if !self.is_flushing() {
            return Err(EventsError::engine("drain_batches called outside of a flush"));
        }

        let mut state = self.state.lock();
        let chunk_size = state.options("drain_batches")?.event_request_chunk_size;

        let mut records: Vec<Value> = state.pending.drain(..).collect();
        let aggregates = std::mem::take(&mut state.aggregates);
        let aggregate_user = json!({ "user_id": AGGREGATE_USER_ID });
        for (_, mut entry) in aggregates {
            if let Some(fields) = entry.event.as_object_mut() {
                fields.insert("value".to_string(), json!(entry.count));
            }
            records.push(Self::record(aggregate_user.clone(), entry.event));
        }

        let payloads: Vec<FlushPayload> = records
            .chunks(chunk_size)
            .map(|chunk| FlushPayload {
                payload_id: uuid::Uuid::new_v4().to_string(),
                event_count: chunk
                    .iter()
                    .map(|r| r["events"].as_array().map_or(0, Vec::len))
                    .sum(),
                records: chunk.to_vec(),
            })
            .collect();

        for payload in &payloads {
            state
                .in_flight
                .insert(payload.payload_id.clone(), payload.clone());
        }

        Ok(payloads)
    }

    fn on_payload_success(&self, payload_id: &str) -> Result<()> {
        self.state
            .lock()
            .in_flight
            .remove(payload_id)
            .map(|_| ())
            .ok_or_else(|| EventsError::engine(format!("Unknown payload {}", payload_id)))
    }

    fn on_payload_failure(&self, payload_id: &str, retry: bool) -> Result<()> {
        let mut state = self.state.lock();
        let payload = state
            .in_flight
            .remove(payload_id)
            .ok_or_else(|| EventsError::engine(format!("Unknown payload {}", payload_id)))?;

        if retry {
            for record in payload.records.into_iter().rev() {
                state.pending.push_front(record);
            }
        } else {
            tracing::debug!(
                "Discarding payload {} with {} events",
                payload_id,
                payload.event_count
            );
        }
        Ok(())
    }
}
