//! Stage nodes: planner, expander, assembler, smoother.
//!
//! A stage reads the run state and returns a [`StateDelta`] touching only its own output key.
//! It never mutates the state itself. Model calls are metered into the [`UsageMeter`] the
//! orchestrator hands in, so completions paid for by a failed attempt still reach the ledger.

pub mod assembler;
pub mod expander;
pub mod planner;
pub mod smoother;

pub use assembler::Assembler;
pub use expander::Expander;
pub use planner::Planner;
pub use smoother::Smoother;

use crate::error::StageError;
use crate::pipeline::state::{GenerationState, StateDelta};
use crate::pipeline::{PipelineConfig, StageKind};
use crate::usage::{MeteredClient, UsageMeter};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    async fn execute(
        &self,
        state: &GenerationState,
        meter: &mut UsageMeter,
    ) -> Result<StateDelta, StageError>;
}

/// The four stages of one pipeline, addressable by kind.
#[derive(Clone)]
pub struct StageSet {
    pub planner: Arc<dyn Stage>,
    pub expander: Arc<dyn Stage>,
    pub assembler: Arc<dyn Stage>,
    pub smoother: Arc<dyn Stage>,
}

impl StageSet {
    /// Model-backed planner, expander and smoother around the deterministic assembler.
    pub fn standard(client: MeteredClient, config: &PipelineConfig) -> Self {
        Self {
            planner: Arc::new(Planner::new(client.clone())),
            expander: Arc::new(Expander::new(client.clone(), config.continuity_chars)),
            assembler: Arc::new(Assembler),
            smoother: Arc::new(Smoother::new(client)),
        }
    }

    pub fn get(&self, kind: StageKind) -> &Arc<dyn Stage> {
        match kind {
            StageKind::Planner => &self.planner,
            StageKind::Expander => &self.expander,
            StageKind::Assembler => &self.assembler,
            StageKind::Smoother => &self.smoother,
        }
    }
}

/// Tail of `text`, at most `max_chars` characters, starting on a word boundary.
pub(crate) fn tail_chars(text: &str, max_chars: usize) -> &str {
    let trimmed = text.trim_end();
    let total = trimmed.chars().count();
    if total <= max_chars {
        return trimmed;
    }
    let start = trimmed
        .char_indices()
        .nth(total - max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let tail = &trimmed[start..];
    match tail.find(char::is_whitespace) {
        Some(space) => tail[space..].trim_start(),
        None => tail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_respects_word_boundary() {
        assert_eq!(tail_chars("short", 10), "short");
        assert_eq!(tail_chars("alpha beta gamma", 8), "gamma");
        assert_eq!(tail_chars("ünïcödé wörds hère", 6), "hère");
    }
}
