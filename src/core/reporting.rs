//! Payload outcomes and the two ways of reporting them to an engine.

use crate::engine::EvaluationEngine;
use crate::error::EventsError;

/// Terminal state of a sent payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadOutcome {
    Succeeded,
    FailedPermanent,
    FailedRetryable,
}

impl PayloadOutcome {
    /// Classify the result of a single send.
    pub fn from_send(result: &std::result::Result<(), EventsError>) -> Self {
        match result {
            Ok(()) => PayloadOutcome::Succeeded,
            Err(e) if e.is_retryable() => PayloadOutcome::FailedRetryable,
            Err(_) => PayloadOutcome::FailedPermanent,
        }
    }
}

/// Outcomes of one flush cycle, grouped by payload id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushResult {
    pub success: Vec<String>,
    pub failure: Vec<String>,
    pub failure_with_retry: Vec<String>,
}

impl FlushResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.success.len() + self.failure.len() + self.failure_with_retry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn outcome_of(&self, payload_id: &str) -> Option<PayloadOutcome> {
        let contains = |ids: &[String]| ids.iter().any(|id| id == payload_id);
        if contains(&self.success) {
            Some(PayloadOutcome::Succeeded)
        } else if contains(&self.failure) {
            Some(PayloadOutcome::FailedPermanent)
        } else if contains(&self.failure_with_retry) {
            Some(PayloadOutcome::FailedRetryable)
        } else {
            None
        }
    }
}

/// Where payload outcomes go as the dispatcher produces them.
pub trait OutcomeReporter {
    fn report(&mut self, payload_id: &str, outcome: PayloadOutcome);
}

/// Batched mode: outcomes accumulate and the owner reports them in one call.
impl OutcomeReporter for FlushResult {
    fn report(&mut self, payload_id: &str, outcome: PayloadOutcome) {
        let ids = match outcome {
            PayloadOutcome::Succeeded => &mut self.success,
            PayloadOutcome::FailedPermanent => &mut self.failure,
            PayloadOutcome::FailedRetryable => &mut self.failure_with_retry,
        };
        ids.push(payload_id.to_string());
    }
}

/// Immediate mode: every outcome goes straight to the engine.
pub struct ImmediateReporter<'a> {
    engine: &'a dyn EvaluationEngine,
}

impl<'a> ImmediateReporter<'a> {
    pub fn new(engine: &'a dyn EvaluationEngine) -> Self {
        Self { engine }
    }
}

impl OutcomeReporter for ImmediateReporter<'_> {
    fn report(&mut self, payload_id: &str, outcome: PayloadOutcome) {
        match outcome {
            PayloadOutcome::Succeeded => {
                if let Err(e) = self.engine.on_payload_success(payload_id) {
                    tracing::error!("Failed to mark payload as success: {}", e);
                }
            }
            PayloadOutcome::FailedPermanent | PayloadOutcome::FailedRetryable => {
                let retry = outcome == PayloadOutcome::FailedRetryable;
                if let Err(e) = self.engine.on_payload_failure(payload_id, retry) {
                    tracing::error!("Failed to mark payload as failed: {}", e);
                }
            }
        }
    }
}
