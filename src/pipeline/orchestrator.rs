//! Sequential run loop: stages, evaluation, transitions, trace.

use crate::error::StageError;
use crate::evaluation::{DocumentEvaluator, Verdict};
use crate::lesson::LessonSpec;
use crate::pipeline::artifacts::Feedback;
use crate::pipeline::outcome::{FailureReason, GenerationFailure, RunReport};
use crate::pipeline::stages::StageSet;
use crate::pipeline::state::{GenerationState, Patch, StateDelta};
use crate::pipeline::transition::{self, PhaseEvent};
use crate::pipeline::{PipelineConfig, RunPhase, StageKind};
use crate::retrieval::{CacheKey, ContextRetriever};
use crate::telemetry::{emit_best_effort, ProgressSink, TransitionEvent};
use crate::usage::{CostSummary, UsageMeter};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Orchestrator {
    stages: StageSet,
    evaluator: Arc<dyn DocumentEvaluator>,
    retriever: Arc<ContextRetriever>,
    sink: Arc<dyn ProgressSink>,
    config: PipelineConfig,
}

/// Per-run bookkeeping outside the state aggregate.
struct RunCursor {
    key: CacheKey,
    cost_mark: CostSummary,
    attempts: u32,
    failure: Option<FailureReason>,
}

impl Orchestrator {
    pub fn new(
        stages: StageSet,
        evaluator: Arc<dyn DocumentEvaluator>,
        retriever: Arc<ContextRetriever>,
        sink: Arc<dyn ProgressSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            stages,
            evaluator,
            retriever,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn retriever(&self) -> &Arc<ContextRetriever> {
        &self.retriever
    }

    /// Drive one lesson to a terminal phase.
    pub async fn run(&self, spec: Arc<LessonSpec>, course_id: &str) -> RunReport {
        let mut state = GenerationState::new(spec.clone(), course_id, self.config.max_retries);
        let mut cursor = RunCursor {
            key: CacheKey::new(course_id, spec.lesson_id.as_str()),
            cost_mark: CostSummary::default(),
            attempts: 0,
            failure: None,
        };

        if let Err(err) = spec.validate() {
            warn!(lesson_id = %spec.lesson_id, error = %err, "Rejecting malformed lesson spec");
            cursor.failure = Some(FailureReason::InvalidSpec {
                reason: err.to_string(),
            });
            state.phase = RunPhase::Rejected;
            self.record(&mut state, &mut cursor, RunPhase::Init, Some(err.to_string()));
            return self.report(state, cursor);
        }

        info!(course_id = %course_id, lesson_id = %spec.lesson_id, "Lesson run started");
        self.apply(&mut state, &mut cursor, PhaseEvent::Begin, None);

        while !state.phase.is_terminal() {
            match state.phase {
                RunPhase::Init | RunPhase::Regenerating => {
                    self.apply(&mut state, &mut cursor, PhaseEvent::Begin, None);
                }
                RunPhase::Evaluating => self.evaluate(&mut state, &mut cursor).await,
                phase => {
                    let Some(kind) = phase.stage() else {
                        break;
                    };
                    if kind == StageKind::Planner {
                        state.context = Some(self.retriever.retrieve(course_id, &spec).await);
                    }
                    let event = match self.run_stage(kind, &mut state).await {
                        Ok(()) => PhaseEvent::StageCompleted(kind),
                        Err(err) => {
                            warn!(stage = %kind, error = %err, "Stage failed");
                            state.errors.push(err.to_string());
                            PhaseEvent::StageFailed(err)
                        }
                    };
                    let detail = match (&event, &state.candidate) {
                        (PhaseEvent::StageCompleted(StageKind::Smoother), Some(doc)) => {
                            Some(format!("candidate {}", doc.short_fingerprint()))
                        }
                        _ => None,
                    };
                    self.apply(&mut state, &mut cursor, event, detail);
                }
            }
        }

        self.retriever.release(course_id, &spec.lesson_id);
        self.report(state, cursor)
    }

    /// Execute one stage, retrying transient failures with exponential backoff.
    ///
    /// Every attempt's usage is booked, whether or not the attempt succeeded.
    async fn run_stage(&self, kind: StageKind, state: &mut GenerationState) -> Result<(), StageError> {
        let stage = self.stages.get(kind).clone();
        let budget = self.config.stage_retry_budget.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut meter = UsageMeter::start(kind.as_str());
            let result = stage.execute(state, &mut meter).await;
            state.record_usage(meter.finish());
            match result {
                Ok(delta) => return state.merge_stage(kind, delta),
                Err(err) if err.is_retryable() && attempt < budget => {
                    let delay = self.config.backoff(attempt);
                    warn!(
                        stage = %kind,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying stage"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) if err.is_retryable() => {
                    return Err(StageError::Exhausted {
                        stage: kind,
                        attempts: attempt,
                        last: err.to_string(),
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn evaluate(&self, state: &mut GenerationState, cursor: &mut RunCursor) {
        let Some(candidate) = state.candidate.clone() else {
            cursor.failure = Some(FailureReason::InvalidTransition {
                reason: "evaluating without a candidate".to_string(),
            });
            state.phase = RunPhase::Rejected;
            self.record(state, cursor, RunPhase::Evaluating, None);
            return;
        };

        let evaluation = self.evaluator.evaluate(&candidate, &state.spec).await;
        cursor.attempts += 1;
        let verdict = evaluation.verdict;
        let mut delta = StateDelta {
            usage: evaluation.usage.clone(),
            ..StateDelta::default()
        };
        match verdict {
            Verdict::Accept => delta.terminal = Patch::Set(candidate),
            Verdict::Regenerate => {
                delta.terminal = Patch::Clear;
                delta.feedback = Patch::Set(Feedback::from_evaluation(state.attempt(), &evaluation));
            }
            Verdict::Reject => delta.terminal = Patch::Clear,
        }
        state.merge(delta);

        let detail = format!(
            "{} at {} with score {:.0}",
            verdict, evaluation.tier_reached, evaluation.score
        );
        state.last_evaluation = Some(evaluation);
        self.apply(state, cursor, PhaseEvent::Evaluated(verdict), Some(detail));
    }

    fn apply(
        &self,
        state: &mut GenerationState,
        cursor: &mut RunCursor,
        event: PhaseEvent,
        detail: Option<String>,
    ) {
        let from = state.phase;
        match transition::next(from, event, state.retry_count(), state.max_retries()) {
            Ok(next) => {
                state.advance_retry(next.retry_count);
                state.phase = next.to;
                let detail = match &next.failure {
                    Some(reason) => Some(reason.to_string()),
                    None => detail,
                };
                if next.failure.is_some() {
                    cursor.failure = next.failure;
                }
                self.record(state, cursor, from, detail);
            }
            Err(err) => {
                warn!(error = %err, "Invalid transition, rejecting run");
                cursor.failure = Some(FailureReason::InvalidTransition {
                    reason: err.to_string(),
                });
                state.phase = RunPhase::Rejected;
                self.record(state, cursor, from, Some(err.to_string()));
            }
        }
    }

    /// Append a trace event for the transition into `state.phase` and emit it.
    fn record(
        &self,
        state: &mut GenerationState,
        cursor: &mut RunCursor,
        from: RunPhase,
        detail: Option<String>,
    ) {
        let totals = state.totals();
        let delta = totals.since(&cursor.cost_mark);
        cursor.cost_mark = totals;
        let event = TransitionEvent::with_now(
            &cursor.key,
            state.trace.len() as u64 + 1,
            from,
            state.phase,
            state.attempt(),
            state.retry_count(),
            delta,
            detail,
        );
        emit_best_effort(self.sink.as_ref(), &event);
        state.trace.push(event);
    }

    fn report(&self, state: GenerationState, cursor: RunCursor) -> RunReport {
        let cost = state.totals();
        let retry_count = state.retry_count();
        let accepted = state.phase == RunPhase::Accepted;
        let document = if accepted {
            state.terminal.document().cloned()
        } else {
            None
        };
        let failure = if accepted {
            None
        } else {
            Some(GenerationFailure {
                course_id: state.course_id.clone(),
                lesson_id: state.spec.lesson_id.clone(),
                reason: cursor.failure.clone().unwrap_or(FailureReason::InvalidTransition {
                    reason: format!("run stopped in {}", state.phase),
                }),
                retry_count,
                issues: state
                    .last_evaluation
                    .as_ref()
                    .map(|e| e.issues.clone())
                    .unwrap_or_default(),
                last_candidate: state.candidate.clone(),
                cost,
            })
        };

        info!(
            course_id = %state.course_id,
            lesson_id = %state.spec.lesson_id,
            phase = %state.phase,
            attempts = cursor.attempts,
            retry_count,
            tokens = cost.tokens,
            cost_usd = cost.cost_usd,
            "Lesson run finished"
        );

        RunReport {
            course_id: state.course_id,
            lesson_id: state.spec.lesson_id.clone(),
            phase: state.phase,
            verdict: state.phase.terminal_verdict(),
            retry_count,
            attempts: cursor.attempts,
            document,
            failure,
            evaluation: state.last_evaluation,
            cost,
            trace: state.trace,
            errors: state.errors,
        }
    }
}
