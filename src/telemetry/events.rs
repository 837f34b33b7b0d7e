//! Event schema for run transitions.

use crate::pipeline::RunPhase;
use crate::retrieval::CacheKey;
use crate::usage::CostSummary;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One state transition of one run, with the tokens and cost spent since the previous one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub ts: String,
    /// Length-prefixed (course, lesson) key; groups the events of one run.
    pub run: String,
    pub course_id: String,
    pub lesson_id: String,
    pub seq: u64,
    pub from: RunPhase,
    pub to: RunPhase,
    pub attempt: u32,
    pub retry_count: u32,
    pub tokens_delta: u64,
    pub cost_delta_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TransitionEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn with_now(
        key: &CacheKey,
        seq: u64,
        from: RunPhase,
        to: RunPhase,
        attempt: u32,
        retry_count: u32,
        delta: CostSummary,
        detail: Option<String>,
    ) -> Self {
        Self {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            run: key.storage_key(),
            course_id: key.course_id.clone(),
            lesson_id: key.lesson_id.clone(),
            seq,
            from,
            to,
            attempt,
            retry_count,
            tokens_delta: delta.tokens,
            cost_delta_usd: delta.cost_usd,
            detail,
        }
    }
}
