//! Lesson generation state machine.
//!
//! One run owns one [`GenerationState`]. Stages execute strictly in order, the cascade
//! evaluates the smoothed candidate, and [`transition::next`] decides where the run goes next,
//! including the regeneration bound.

pub mod artifacts;
pub mod facade;
pub mod orchestrator;
pub mod outcome;
pub mod stages;
pub mod state;
pub mod transition;

pub use artifacts::{AssembledDocument, ExpandedSection, Feedback, Outline, OutlineSection};
pub use facade::Pipeline;
pub use orchestrator::Orchestrator;
pub use outcome::{FailureReason, GenerationFailure, RunReport};
pub use state::{CostLedger, GenerationState, OutputKey, Patch, StateDelta, TerminalContent};
pub use transition::{PhaseEvent, Transition, TransitionError};

use crate::evaluation::Verdict;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The four sequential transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Planner,
    Expander,
    Assembler,
    Smoother,
}

impl StageKind {
    pub const ORDER: [StageKind; 4] = [
        StageKind::Planner,
        StageKind::Expander,
        StageKind::Assembler,
        StageKind::Smoother,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Planner => "planner",
            StageKind::Expander => "expander",
            StageKind::Assembler => "assembler",
            StageKind::Smoother => "smoother",
        }
    }

    /// The only state key this stage may write.
    pub fn output_key(self) -> OutputKey {
        match self {
            StageKind::Planner => OutputKey::Outline,
            StageKind::Expander => OutputKey::Sections,
            StageKind::Assembler => OutputKey::Assembled,
            StageKind::Smoother => OutputKey::Candidate,
        }
    }

    /// Phase during which this stage runs.
    pub fn phase(self) -> RunPhase {
        match self {
            StageKind::Planner => RunPhase::Planning,
            StageKind::Expander => RunPhase::Expanding,
            StageKind::Assembler => RunPhase::Assembling,
            StageKind::Smoother => RunPhase::Smoothing,
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Planning,
    Expanding,
    Assembling,
    Smoothing,
    Evaluating,
    Regenerating,
    Accepted,
    Rejected,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Init => "init",
            RunPhase::Planning => "planning",
            RunPhase::Expanding => "expanding",
            RunPhase::Assembling => "assembling",
            RunPhase::Smoothing => "smoothing",
            RunPhase::Evaluating => "evaluating",
            RunPhase::Regenerating => "regenerating",
            RunPhase::Accepted => "accepted",
            RunPhase::Rejected => "rejected",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Accepted | RunPhase::Rejected)
    }

    /// Final verdict of a run that ended in this phase. Every rejection reads as `Reject`,
    /// whatever the last evaluation said.
    pub fn terminal_verdict(self) -> Option<Verdict> {
        match self {
            RunPhase::Accepted => Some(Verdict::Accept),
            RunPhase::Rejected => Some(Verdict::Reject),
            _ => None,
        }
    }

    /// Stage that runs in this phase, if any.
    pub fn stage(self) -> Option<StageKind> {
        match self {
            RunPhase::Planning => Some(StageKind::Planner),
            RunPhase::Expanding => Some(StageKind::Expander),
            RunPhase::Assembling => Some(StageKind::Assembler),
            RunPhase::Smoothing => Some(StageKind::Smoother),
            _ => None,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_stage_retry_budget() -> u32 {
    3
}
fn default_stage_backoff_ms() -> u64 {
    250
}
fn default_call_timeout_secs() -> u64 {
    120
}
fn default_continuity_chars() -> usize {
    600
}

/// Retry bounds and timeouts for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Generation attempts before the run is rejected
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Local attempts per stage for transient failures
    #[serde(default = "default_stage_retry_budget")]
    pub stage_retry_budget: u32,
    /// Base delay, doubled on every stage retry
    #[serde(default = "default_stage_backoff_ms")]
    pub stage_backoff_ms: u64,
    /// Timeout applied to every completion call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    /// Tail of the previous section handed to the expander
    #[serde(default = "default_continuity_chars")]
    pub continuity_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            stage_retry_budget: default_stage_retry_budget(),
            stage_backoff_ms: default_stage_backoff_ms(),
            call_timeout_secs: default_call_timeout_secs(),
            continuity_chars: default_continuity_chars(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 {
            return Err("max_retries must be at least 1".to_string());
        }
        if self.stage_retry_budget == 0 {
            return Err("stage_retry_budget must be at least 1".to_string());
        }
        if self.call_timeout_secs == 0 {
            return Err("call_timeout_secs must be positive".to_string());
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    /// Delay before local retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.stage_backoff_ms.saturating_mul(factor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let config = PipelineConfig {
            stage_backoff_ms: 100,
            ..PipelineConfig::default()
        };
        assert_eq!(config.backoff(1), Duration::from_millis(100));
        assert_eq!(config.backoff(2), Duration::from_millis(200));
        assert_eq!(config.backoff(4), Duration::from_millis(800));
    }

    #[test]
    fn each_stage_owns_a_distinct_key() {
        let keys: std::collections::HashSet<OutputKey> =
            StageKind::ORDER.iter().map(|s| s.output_key()).collect();
        assert_eq!(keys.len(), 4);
        assert_eq!(StageKind::Smoother.phase(), RunPhase::Smoothing);
        assert_eq!(RunPhase::Expanding.stage(), Some(StageKind::Expander));
    }

    #[test]
    fn only_terminal_phases_carry_a_verdict() {
        assert_eq!(RunPhase::Accepted.terminal_verdict(), Some(Verdict::Accept));
        assert_eq!(RunPhase::Rejected.terminal_verdict(), Some(Verdict::Reject));
        assert_eq!(RunPhase::Regenerating.terminal_verdict(), None);
    }
}
