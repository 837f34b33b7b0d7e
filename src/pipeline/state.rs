//! Run state aggregate and tri-state delta merging.

use crate::error::StageError;
use crate::evaluation::EvaluationResult;
use crate::lesson::{LessonDocument, LessonSpec};
use crate::pipeline::artifacts::{AssembledDocument, ExpandedSection, Feedback, Outline};
use crate::pipeline::{RunPhase, StageKind};
use crate::retrieval::ContextBundle;
use crate::telemetry::TransitionEvent;
use crate::usage::{CostSummary, UsageRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// One field of a [`StateDelta`].
///
/// `Clear` is an explicit null and is always honored; it is never confused with `Keep`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Patch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    pub fn apply(self, slot: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *slot = None,
            Patch::Set(value) => *slot = Some(value),
        }
    }
}

/// Terminal output of a run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "document", rename_all = "snake_case")]
pub enum TerminalContent {
    /// Nothing produced yet.
    #[default]
    Pending,
    /// Explicitly discarded; the run must regenerate.
    Discarded,
    Accepted(LessonDocument),
}

impl TerminalContent {
    pub fn document(&self) -> Option<&LessonDocument> {
        match self {
            TerminalContent::Accepted(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn apply(&mut self, patch: Patch<LessonDocument>) {
        match patch {
            Patch::Keep => {}
            Patch::Clear => *self = TerminalContent::Discarded,
            Patch::Set(doc) => *self = TerminalContent::Accepted(doc),
        }
    }
}

/// State keys a delta can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKey {
    Outline,
    Sections,
    Assembled,
    Candidate,
    Terminal,
    Feedback,
}

/// Changes returned by a stage (or by the orchestrator itself) to be merged into the state.
#[derive(Debug, Clone, Default)]
pub struct StateDelta {
    pub outline: Patch<Outline>,
    pub sections: Patch<Vec<ExpandedSection>>,
    pub assembled: Patch<AssembledDocument>,
    pub candidate: Patch<LessonDocument>,
    pub terminal: Patch<LessonDocument>,
    pub feedback: Patch<Feedback>,
    /// Appended to the cost ledger.
    pub usage: Vec<UsageRecord>,
    /// Appended to the error list.
    pub errors: Vec<String>,
}

impl StateDelta {
    pub fn outline(outline: Outline) -> Self {
        Self {
            outline: Patch::Set(outline),
            ..Self::default()
        }
    }

    pub fn sections(sections: Vec<ExpandedSection>) -> Self {
        Self {
            sections: Patch::Set(sections),
            ..Self::default()
        }
    }

    pub fn assembled(document: AssembledDocument) -> Self {
        Self {
            assembled: Patch::Set(document),
            ..Self::default()
        }
    }

    pub fn candidate(document: LessonDocument) -> Self {
        Self {
            candidate: Patch::Set(document),
            ..Self::default()
        }
    }

    pub fn with_usage(mut self, usage: UsageRecord) -> Self {
        self.usage.push(usage);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.errors.push(error.into());
        self
    }

    /// Keys this delta writes (anything not `Keep`).
    pub fn written_keys(&self) -> Vec<OutputKey> {
        let mut keys = Vec::new();
        if !self.outline.is_keep() {
            keys.push(OutputKey::Outline);
        }
        if !self.sections.is_keep() {
            keys.push(OutputKey::Sections);
        }
        if !self.assembled.is_keep() {
            keys.push(OutputKey::Assembled);
        }
        if !self.candidate.is_keep() {
            keys.push(OutputKey::Candidate);
        }
        if !self.terminal.is_keep() {
            keys.push(OutputKey::Terminal);
        }
        if !self.feedback.is_keep() {
            keys.push(OutputKey::Feedback);
        }
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub attempt: u32,
    pub usage: UsageRecord,
}

/// Append-only token and cost ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    entries: Vec<LedgerEntry>,
}

impl CostLedger {
    pub fn append(&mut self, attempt: u32, usage: UsageRecord) {
        self.entries.push(LedgerEntry { attempt, usage });
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn totals(&self) -> CostSummary {
        CostSummary::from_records(self.entries.iter().map(|e| &e.usage))
    }
}

/// Everything one run knows. Owned exclusively by its orchestrator.
#[derive(Debug, Clone)]
pub struct GenerationState {
    pub spec: Arc<LessonSpec>,
    pub course_id: String,
    pub phase: RunPhase,
    pub context: Option<Arc<ContextBundle>>,
    pub outline: Option<Outline>,
    pub sections: Option<Vec<ExpandedSection>>,
    pub assembled: Option<AssembledDocument>,
    pub candidate: Option<LessonDocument>,
    pub terminal: TerminalContent,
    pub feedback: Option<Feedback>,
    pub last_evaluation: Option<EvaluationResult>,
    pub ledger: CostLedger,
    pub errors: Vec<String>,
    retry_count: u32,
    max_retries: u32,
    pub trace: Vec<TransitionEvent>,
}

impl GenerationState {
    pub fn new(spec: Arc<LessonSpec>, course_id: impl Into<String>, max_retries: u32) -> Self {
        Self {
            spec,
            course_id: course_id.into(),
            phase: RunPhase::Init,
            context: None,
            outline: None,
            sections: None,
            assembled: None,
            candidate: None,
            terminal: TerminalContent::Pending,
            feedback: None,
            last_evaluation: None,
            ledger: CostLedger::default(),
            errors: Vec::new(),
            retry_count: 0,
            max_retries,
            trace: Vec::new(),
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    /// Only ever moves forward by one.
    pub fn advance_retry(&mut self, to: u32) {
        if to == self.retry_count + 1 {
            self.retry_count = to;
        }
    }

    pub fn totals(&self) -> CostSummary {
        self.ledger.totals()
    }

    /// Book usage against the current attempt. Empty records are skipped.
    pub fn record_usage(&mut self, usage: UsageRecord) {
        if usage.calls > 0 || usage.total_tokens() > 0 {
            let attempt = self.attempt();
            self.ledger.append(attempt, usage);
        }
    }

    /// Merge any delta. Ownership is not checked here.
    pub fn merge(&mut self, delta: StateDelta) {
        let attempt = self.attempt();
        delta.outline.apply(&mut self.outline);
        delta.sections.apply(&mut self.sections);
        delta.assembled.apply(&mut self.assembled);
        delta.candidate.apply(&mut self.candidate);
        self.terminal.apply(delta.terminal);
        delta.feedback.apply(&mut self.feedback);
        for usage in delta.usage {
            self.ledger.append(attempt, usage);
        }
        self.errors.extend(delta.errors);
    }

    /// Merge a stage's delta after checking it wrote nothing but its own key.
    pub fn merge_stage(&mut self, stage: StageKind, delta: StateDelta) -> Result<(), StageError> {
        let own = stage.output_key();
        if let Some(foreign) = delta.written_keys().into_iter().find(|k| *k != own) {
            return Err(StageError::terminal(
                stage,
                format!("wrote {:?}, which it does not own", foreign),
            ));
        }
        self.merge(delta);
        Ok(())
    }
}
