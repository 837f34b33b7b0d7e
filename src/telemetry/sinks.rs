//! Progress sinks. Emission is best-effort: a failing sink never fails a run.

use crate::error::ApiError;
use crate::telemetry::events::TransitionEvent;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use tracing::{info, warn};

/// Receives every transition of every run it is attached to.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &TransitionEvent) -> Result<(), ApiError>;
}

/// Emit and log on failure.
pub fn emit_best_effort(sink: &dyn ProgressSink, event: &TransitionEvent) {
    if let Err(err) = sink.emit(event) {
        warn!(
            run = %event.run,
            seq = event.seq,
            error = %err,
            "Progress event emission failed"
        );
    }
}

/// Writes transitions to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn emit(&self, event: &TransitionEvent) -> Result<(), ApiError> {
        info!(
            course_id = %event.course_id,
            lesson_id = %event.lesson_id,
            seq = event.seq,
            from = %event.from,
            to = %event.to,
            attempt = event.attempt,
            tokens_delta = event.tokens_delta,
            cost_delta_usd = event.cost_delta_usd,
            detail = event.detail.as_deref().unwrap_or(""),
            "Run transition"
        );
        Ok(())
    }
}

/// In-process event bus; the receiving half is handed to whoever renders progress.
#[derive(Clone)]
pub struct ProgressBus {
    sender: Sender<TransitionEvent>,
}

impl ProgressBus {
    pub fn new_pair() -> (Self, Receiver<TransitionEvent>) {
        let (sender, receiver) = channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ProgressBus {
    fn emit(&self, event: &TransitionEvent) -> Result<(), ApiError> {
        self.sender
            .send(event.clone())
            .map_err(|_| ApiError::QueueError("progress receiver dropped".to_string()))
    }
}

/// Forwards to several sinks; every sink is attempted even when one fails.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn ProgressSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl ProgressSink for FanoutSink {
    fn emit(&self, event: &TransitionEvent) -> Result<(), ApiError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(err) = sink.emit(event) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
