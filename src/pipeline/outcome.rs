//! What a finished run hands back to its caller.

use crate::evaluation::{EvaluationResult, Issue, Verdict};
use crate::lesson::LessonDocument;
use crate::pipeline::{RunPhase, StageKind};
use crate::telemetry::TransitionEvent;
use crate::usage::CostSummary;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    InvalidSpec { reason: String },
    EvaluatorRejected,
    MaxRetriesExhausted,
    StageBudgetExhausted { stage: StageKind, attempts: u32 },
    StageFailed { stage: StageKind, reason: String },
    InvalidTransition { reason: String },
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InvalidSpec { reason } => write!(f, "invalid lesson spec: {}", reason),
            FailureReason::EvaluatorRejected => f.write_str("rejected by evaluator"),
            FailureReason::MaxRetriesExhausted => f.write_str("max retries exhausted"),
            FailureReason::StageBudgetExhausted { stage, attempts } => write!(
                f,
                "stage budget exhausted ({} after {} attempts)",
                stage, attempts
            ),
            FailureReason::StageFailed { stage, reason } => write!(f, "{} failed: {}", stage, reason),
            FailureReason::InvalidTransition { reason } => write!(f, "invalid transition: {}", reason),
            FailureReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Structured failure returned instead of a document.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("lesson {lesson_id} in course {course_id}: {reason} (retries: {retry_count})")]
pub struct GenerationFailure {
    pub course_id: String,
    pub lesson_id: String,
    pub reason: FailureReason,
    pub retry_count: u32,
    /// Issues of the last evaluation, if one ran.
    pub issues: Vec<Issue>,
    /// Last candidate produced, kept for diagnostics. Never an accepted result.
    pub last_candidate: Option<LessonDocument>,
    pub cost: CostSummary,
}

/// Full record of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub course_id: String,
    pub lesson_id: String,
    pub phase: RunPhase,
    /// Verdict of the terminal phase; the last evaluation's own verdict is on `evaluation`.
    pub verdict: Option<Verdict>,
    pub retry_count: u32,
    /// Number of candidates that reached evaluation.
    pub attempts: u32,
    pub document: Option<LessonDocument>,
    pub failure: Option<GenerationFailure>,
    pub evaluation: Option<EvaluationResult>,
    pub cost: CostSummary,
    pub trace: Vec<TransitionEvent>,
    pub errors: Vec<String>,
}

impl RunReport {
    /// Report for a run aborted before it reached a terminal phase.
    pub fn cancelled(course_id: &str, lesson_id: &str) -> Self {
        Self {
            course_id: course_id.to_string(),
            lesson_id: lesson_id.to_string(),
            phase: RunPhase::Rejected,
            verdict: RunPhase::Rejected.terminal_verdict(),
            retry_count: 0,
            attempts: 0,
            document: None,
            failure: Some(GenerationFailure {
                course_id: course_id.to_string(),
                lesson_id: lesson_id.to_string(),
                reason: FailureReason::Cancelled,
                retry_count: 0,
                issues: Vec::new(),
                last_candidate: None,
                cost: CostSummary::default(),
            }),
            evaluation: None,
            cost: CostSummary::default(),
            trace: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.phase == RunPhase::Accepted && self.document.is_some()
    }

    pub fn into_result(self) -> Result<LessonDocument, GenerationFailure> {
        match (self.document, self.failure) {
            (Some(document), None) => Ok(document),
            (_, Some(failure)) => Err(failure),
            (None, None) => Err(GenerationFailure {
                course_id: self.course_id,
                lesson_id: self.lesson_id,
                reason: FailureReason::InvalidTransition {
                    reason: format!("run ended in {} without output", self.phase),
                },
                retry_count: self.retry_count,
                issues: Vec::new(),
                last_candidate: None,
                cost: self.cost,
            }),
        }
    }
}
