//! Quality cascade: free heuristics, then one model judge, then a multi-rater vote.
//!
//! Each tier reports a [`TierOutcome`]. The cascade escalates strictly upward and stops at the
//! first tier that resolves, so most lessons cost nothing to evaluate.

pub mod cascade;
pub mod ensemble;
pub mod heuristic;
pub mod judge;

pub use cascade::CascadeEvaluator;
pub use ensemble::{EnsembleVerdict, MultiRaterEnsemble, RaterVote};
pub use heuristic::{check_markdown, HeuristicFilter, HeuristicResult};
pub use judge::{JudgeVerdict, RaterReport, RubricRater, RubricScores, SingleJudge};

use crate::lesson::{LessonDocument, LessonSpec};
use crate::usage::{CostSummary, UsageRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
        }
    }

    /// Points deducted from the heuristic score per issue.
    pub fn weight(self) -> f64 {
        match self {
            Severity::Critical => 10.0,
            Severity::Major => 3.0,
            Severity::Minor => 1.0,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "critical" | "blocker" => Severity::Critical,
            "major" | "high" => Severity::Major,
            _ => Severity::Minor,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Heuristic = 1,
    Judge = 2,
    Ensemble = 3,
}

impl Tier {
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Heuristic => "heuristic",
            Tier::Judge => "judge",
            Tier::Ensemble => "ensemble",
        };
        write!(f, "tier {} ({})", self.number(), name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Accept,
    Regenerate,
    Reject,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Accept => "accept",
            Verdict::Regenerate => "regenerate",
            Verdict::Reject => "reject",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Verdict::Regenerate)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One finding from any tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub location: Option<String>,
    pub description: String,
    pub suggested_fix: Option<String>,
    pub tier: Tier,
}

impl Issue {
    pub fn heuristic(
        severity: Severity,
        location: impl Into<String>,
        description: impl Into<String>,
        suggested_fix: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            location: Some(location.into()),
            description: description.into(),
            suggested_fix: Some(suggested_fix.into()),
            tier: Tier::Heuristic,
        }
    }
}

/// What a tier decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TierOutcome {
    /// The tier is confident; the cascade stops here.
    Resolved {
        tier: Tier,
        verdict: Verdict,
        confidence: f64,
    },
    /// The tier cannot decide; hand over to the next one.
    Escalate { tier: Tier, reason: String },
    /// The tier's capability failed; degrade.
    Unavailable { tier: Tier, reason: String },
}

impl TierOutcome {
    pub fn tier(&self) -> Tier {
        match self {
            TierOutcome::Resolved { tier, .. }
            | TierOutcome::Escalate { tier, .. }
            | TierOutcome::Unavailable { tier, .. } => *tier,
        }
    }

    pub fn label(&self) -> String {
        match self {
            TierOutcome::Resolved { verdict, .. } => format!("resolved:{}", verdict),
            TierOutcome::Escalate { reason, .. } => format!("escalate:{}", reason),
            TierOutcome::Unavailable { reason, .. } => format!("unavailable:{}", reason),
        }
    }
}

/// Trail entry for one executed tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRecord {
    pub tier: Tier,
    pub score: Option<f64>,
    pub outcome: String,
    pub cost: CostSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub score: f64,
    pub verdict: Verdict,
    pub issues: Vec<Issue>,
    pub tier_reached: Tier,
    pub cost: CostSummary,
    pub trail: Vec<TierRecord>,
    pub usage: Vec<UsageRecord>,
}

impl EvaluationResult {
    pub fn critical_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Critical)
            .count()
    }
}

/// Read-only evaluation of a candidate document.
#[async_trait]
pub trait DocumentEvaluator: Send + Sync {
    async fn evaluate(&self, document: &LessonDocument, spec: &LessonSpec) -> EvaluationResult;
}

fn default_pass_threshold() -> f64 {
    75.0
}
fn default_catastrophic_threshold() -> f64 {
    50.0
}
fn default_min_word_ratio() -> f64 {
    0.6
}
fn default_max_word_ratio() -> f64 {
    1.6
}
fn default_severe_word_ratio() -> f64 {
    0.25
}
fn default_readability_min() -> f64 {
    30.0
}
fn default_readability_max() -> f64 {
    90.0
}
fn default_min_topic_coverage() -> f64 {
    0.5
}
fn default_judge_accept() -> f64 {
    80.0
}
fn default_judge_regenerate() -> f64 {
    60.0
}
fn default_reject_floor() -> f64 {
    20.0
}
fn default_ensemble_accept() -> f64 {
    70.0
}
fn default_raters() -> usize {
    2
}
fn default_disagreement_tolerance() -> f64 {
    15.0
}
fn default_judge_timeout_secs() -> u64 {
    90
}
fn default_rater_timeout_secs() -> u64 {
    60
}

/// Thresholds and budgets for the cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Heuristic score at or above which (with no critical issue) tier 1 accepts
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    /// Heuristic score below which tier 1 asks for regeneration
    #[serde(default = "default_catastrophic_threshold")]
    pub catastrophic_threshold: f64,
    #[serde(default = "default_min_word_ratio")]
    pub min_word_ratio: f64,
    #[serde(default = "default_max_word_ratio")]
    pub max_word_ratio: f64,
    #[serde(default = "default_severe_word_ratio")]
    pub severe_word_ratio: f64,
    #[serde(default = "default_readability_min")]
    pub readability_min: f64,
    #[serde(default = "default_readability_max")]
    pub readability_max: f64,
    #[serde(default = "default_min_topic_coverage")]
    pub min_topic_coverage: f64,
    #[serde(default = "default_judge_accept")]
    pub judge_accept: f64,
    #[serde(default = "default_judge_regenerate")]
    pub judge_regenerate: f64,
    /// Judge or rater score below which the lesson is rejected outright
    #[serde(default = "default_reject_floor")]
    pub reject_floor: f64,
    #[serde(default = "default_ensemble_accept")]
    pub ensemble_accept: f64,
    #[serde(default = "default_raters")]
    pub raters: usize,
    /// Rater score spread that triggers a tie-break pass
    #[serde(default = "default_disagreement_tolerance")]
    pub disagreement_tolerance: f64,
    #[serde(default = "default_judge_timeout_secs")]
    pub judge_timeout_secs: u64,
    #[serde(default = "default_rater_timeout_secs")]
    pub rater_timeout_secs: u64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            pass_threshold: default_pass_threshold(),
            catastrophic_threshold: default_catastrophic_threshold(),
            min_word_ratio: default_min_word_ratio(),
            max_word_ratio: default_max_word_ratio(),
            severe_word_ratio: default_severe_word_ratio(),
            readability_min: default_readability_min(),
            readability_max: default_readability_max(),
            min_topic_coverage: default_min_topic_coverage(),
            judge_accept: default_judge_accept(),
            judge_regenerate: default_judge_regenerate(),
            reject_floor: default_reject_floor(),
            ensemble_accept: default_ensemble_accept(),
            raters: default_raters(),
            disagreement_tolerance: default_disagreement_tolerance(),
            judge_timeout_secs: default_judge_timeout_secs(),
            rater_timeout_secs: default_rater_timeout_secs(),
        }
    }
}

impl CascadeConfig {
    pub fn validate(&self) -> Result<(), String> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.pass_threshold) || !in_range(self.catastrophic_threshold) {
            return Err("heuristic thresholds must be within 0-100".to_string());
        }
        if self.catastrophic_threshold > self.pass_threshold {
            return Err("catastrophic_threshold cannot exceed pass_threshold".to_string());
        }
        if !(self.reject_floor <= self.judge_regenerate && self.judge_regenerate <= self.judge_accept)
        {
            return Err("expected reject_floor <= judge_regenerate <= judge_accept".to_string());
        }
        if !(self.reject_floor..=100.0).contains(&self.ensemble_accept) {
            return Err("ensemble_accept must lie between reject_floor and 100".to_string());
        }
        if !(0.0 < self.severe_word_ratio
            && self.severe_word_ratio <= self.min_word_ratio
            && self.min_word_ratio < self.max_word_ratio)
        {
            return Err("expected 0 < severe_word_ratio <= min_word_ratio < max_word_ratio".to_string());
        }
        if self.readability_min >= self.readability_max {
            return Err("readability_min must be below readability_max".to_string());
        }
        if self.raters == 0 {
            return Err("raters must be at least 1".to_string());
        }
        if self.disagreement_tolerance < 0.0 {
            return Err("disagreement_tolerance cannot be negative".to_string());
        }
        if self.judge_timeout_secs == 0 || self.rater_timeout_secs == 0 {
            return Err("judge and rater timeouts must be positive".to_string());
        }
        Ok(())
    }

    /// Minimum rater responses for a valid vote.
    pub fn quorum(&self) -> usize {
        self.raters.saturating_sub(1).max(1)
    }
}
