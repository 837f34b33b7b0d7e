//! The run's transition function. The regeneration bound is enforced here and nowhere else.

use crate::error::StageError;
use crate::evaluation::Verdict;
use crate::pipeline::outcome::FailureReason;
use crate::pipeline::{RunPhase, StageKind};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseEvent {
    /// Start a (new) attempt.
    Begin,
    StageCompleted(StageKind),
    StageFailed(StageError),
    Evaluated(Verdict),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: RunPhase,
    pub to: RunPhase,
    pub retry_count: u32,
    /// Set when `to` is [`RunPhase::Rejected`].
    pub failure: Option<FailureReason>,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("no transition from {from} on {event:?}")]
pub struct TransitionError {
    pub from: RunPhase,
    pub event: PhaseEvent,
}

fn failure_for(err: &StageError) -> FailureReason {
    match err {
        StageError::Exhausted {
            stage, attempts, ..
        } => FailureReason::StageBudgetExhausted {
            stage: *stage,
            attempts: *attempts,
        },
        StageError::Terminal { stage, reason } | StageError::Retryable { stage, reason } => {
            FailureReason::StageFailed {
                stage: *stage,
                reason: reason.clone(),
            }
        }
    }
}

fn next_stage_phase(stage: StageKind) -> RunPhase {
    match stage {
        StageKind::Planner => RunPhase::Expanding,
        StageKind::Expander => RunPhase::Assembling,
        StageKind::Assembler => RunPhase::Smoothing,
        StageKind::Smoother => RunPhase::Evaluating,
    }
}

/// Compute the next phase.
///
/// A regenerate verdict increments the retry counter by exactly one; when the incremented
/// counter reaches `max_retries` the run is rejected instead of re-entering planning.
pub fn next(
    from: RunPhase,
    event: PhaseEvent,
    retry_count: u32,
    max_retries: u32,
) -> Result<Transition, TransitionError> {
    let to = |to: RunPhase| Transition {
        from,
        to,
        retry_count,
        failure: None,
    };
    let rejected = |retry_count: u32, reason: FailureReason| Transition {
        from,
        to: RunPhase::Rejected,
        retry_count,
        failure: Some(reason),
    };

    match (from, event) {
        (RunPhase::Init | RunPhase::Regenerating, PhaseEvent::Begin) => Ok(to(RunPhase::Planning)),
        (phase, PhaseEvent::StageCompleted(stage)) if phase.stage() == Some(stage) => {
            Ok(to(next_stage_phase(stage)))
        }
        (phase, PhaseEvent::StageFailed(err)) if phase.stage() == Some(err.stage()) => {
            Ok(rejected(retry_count, failure_for(&err)))
        }
        (RunPhase::Evaluating, PhaseEvent::Evaluated(verdict)) => match verdict {
            Verdict::Accept => Ok(to(RunPhase::Accepted)),
            Verdict::Reject => Ok(rejected(retry_count, FailureReason::EvaluatorRejected)),
            Verdict::Regenerate => {
                let incremented = retry_count + 1;
                if incremented >= max_retries {
                    Ok(rejected(incremented, FailureReason::MaxRetriesExhausted))
                } else {
                    Ok(Transition {
                        from,
                        to: RunPhase::Regenerating,
                        retry_count: incremented,
                        failure: None,
                    })
                }
            }
        },
        (from, event) => Err(TransitionError { from, event }),
    }
}
