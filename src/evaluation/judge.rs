//! Tier 2: one rubric evaluation through the judging model.

use crate::error::ApiError;
use crate::evaluation::{CascadeConfig, Issue, Severity, Tier, TierOutcome, Verdict};
use crate::lesson::{LessonDocument, LessonSpec};
use crate::prompt::{bullet_list, embed_document, extract_json_object};
use crate::provider::ModelHint;
use crate::usage::{MeteredClient, UsageMeter, UsageRecord};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Four rubric dimensions, each 0-100.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RubricScores {
    pub clarity: f64,
    pub coverage: f64,
    pub pedagogy: f64,
    pub engagement: f64,
}

impl RubricScores {
    pub fn mean(&self) -> f64 {
        (self.clarity + self.coverage + self.pedagogy + self.engagement) / 4.0
    }

    fn clamped(self) -> Self {
        let c = |v: f64| v.clamp(0.0, 100.0);
        Self {
            clarity: c(self.clarity),
            coverage: c(self.coverage),
            pedagogy: c(self.pedagogy),
            engagement: c(self.engagement),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    location: Option<String>,
    description: String,
    #[serde(default)]
    suggested_fix: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRubric {
    clarity: f64,
    coverage: f64,
    pedagogy: f64,
    engagement: f64,
    #[serde(default)]
    issues: Vec<RawIssue>,
}

/// One rater's parsed answer.
#[derive(Debug, Clone, PartialEq)]
pub struct RaterReport {
    pub rater_id: String,
    pub scores: RubricScores,
    pub score: f64,
    pub issues: Vec<Issue>,
    pub usage: UsageRecord,
}

/// A rater that produced no usable answer. Usage already spent is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct RaterError {
    pub rater_id: String,
    pub reason: String,
    pub usage: UsageRecord,
}

/// Rubric evaluation through the completion capability. Shared by tier 2 and tier 3.
#[derive(Clone)]
pub struct RubricRater {
    client: MeteredClient,
}

impl RubricRater {
    pub fn new(client: MeteredClient) -> Self {
        Self { client }
    }

    pub fn prompt(
        document: &LessonDocument,
        spec: &LessonSpec,
        known_issues: &[Issue],
        rater_id: &str,
    ) -> String {
        let known: Vec<String> = known_issues
            .iter()
            .map(|i| format!("{}: {}", i.severity.as_str(), i.description))
            .collect();
        format!(
            "ROLE: lesson-judge\n\
             RATER: {rater}\n\
             Review the lesson titled \"{title}\".\n\
             Objectives:\n{objectives}\n\
             Required topics:\n{topics}\n\
             Automated checks already found:\n{known}\n\
             Score clarity, coverage, pedagogy and engagement from 0 to 100.\n\
             Reply with one JSON object only:\n\
             {{\"clarity\": 0, \"coverage\": 0, \"pedagogy\": 0, \"engagement\": 0, \
             \"issues\": [{{\"severity\": \"critical|major|minor\", \"location\": \"...\", \
             \"description\": \"...\", \"suggested_fix\": \"...\"}}]}}\n\
             {document}\n",
            rater = rater_id,
            title = spec.title,
            objectives = bullet_list(&spec.objectives),
            topics = bullet_list(&spec.topics),
            known = bullet_list(&known),
            document = embed_document(&document.markdown),
        )
    }

    pub fn parse_reply(reply: &str, tier: Tier) -> Result<(RubricScores, Vec<Issue>), ApiError> {
        let json = extract_json_object(reply)
            .ok_or_else(|| ApiError::MalformedOutput("judge reply has no JSON object".to_string()))?;
        let raw: RawRubric = serde_json::from_str(json)
            .map_err(|e| ApiError::MalformedOutput(format!("judge reply: {}", e)))?;
        let issues = raw
            .issues
            .into_iter()
            .map(|i| Issue {
                severity: Severity::parse(&i.severity),
                location: i.location,
                description: i.description,
                suggested_fix: i.suggested_fix,
                tier,
            })
            .collect();
        let scores = RubricScores {
            clarity: raw.clarity,
            coverage: raw.coverage,
            pedagogy: raw.pedagogy,
            engagement: raw.engagement,
        };
        Ok((scores.clamped(), issues))
    }

    pub async fn rate(
        &self,
        document: &LessonDocument,
        spec: &LessonSpec,
        known_issues: &[Issue],
        rater_id: &str,
        tier: Tier,
        timeout: Duration,
    ) -> Result<RaterReport, RaterError> {
        let mut meter = UsageMeter::start(rater_id);
        let prompt = Self::prompt(document, spec, known_issues, rater_id);
        let reply = self
            .client
            .complete_within(&mut meter, &prompt, ModelHint::Judging, timeout)
            .await;
        let parsed = match reply {
            Ok(completion) => Self::parse_reply(&completion.text, tier),
            Err(err) => Err(err),
        };
        let usage = meter.finish();
        match parsed {
            Ok((scores, issues)) => {
                let score = scores.mean();
                debug!(rater = %rater_id, score, issues = issues.len(), "Rater scored lesson");
                Ok(RaterReport {
                    rater_id: rater_id.to_string(),
                    scores,
                    score,
                    issues,
                    usage,
                })
            }
            Err(err) => Err(RaterError {
                rater_id: rater_id.to_string(),
                reason: err.to_string(),
                usage,
            }),
        }
    }
}

/// Tier 2 result.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeVerdict {
    pub score: Option<f64>,
    pub issues: Vec<Issue>,
    pub outcome: TierOutcome,
    pub usage: UsageRecord,
}

pub struct SingleJudge {
    rater: RubricRater,
    config: CascadeConfig,
}

impl SingleJudge {
    pub const RATER_ID: &'static str = "judge";

    pub fn new(rater: RubricRater, config: CascadeConfig) -> Self {
        Self { rater, config }
    }

    /// Map a judge score onto accept / reject / regenerate, or `None` when ambiguous.
    pub fn classify(&self, score: f64) -> Option<Verdict> {
        if score >= self.config.judge_accept {
            Some(Verdict::Accept)
        } else if score < self.config.reject_floor {
            Some(Verdict::Reject)
        } else if score < self.config.judge_regenerate {
            Some(Verdict::Regenerate)
        } else {
            None
        }
    }

    pub async fn judge(
        &self,
        document: &LessonDocument,
        spec: &LessonSpec,
        heuristic_issues: &[Issue],
    ) -> JudgeVerdict {
        let timeout = Duration::from_secs(self.config.judge_timeout_secs);
        let result = self
            .rater
            .rate(document, spec, heuristic_issues, Self::RATER_ID, Tier::Judge, timeout)
            .await;

        match result {
            Ok(report) => {
                let outcome = match self.classify(report.score) {
                    Some(verdict) => TierOutcome::Resolved {
                        tier: Tier::Judge,
                        verdict,
                        confidence: (report.score - 50.0).abs() / 50.0,
                    },
                    None => TierOutcome::Escalate {
                        tier: Tier::Judge,
                        reason: format!("ambiguous judge score {:.0}", report.score),
                    },
                };
                JudgeVerdict {
                    score: Some(report.score),
                    issues: report.issues,
                    outcome,
                    usage: report.usage,
                }
            }
            Err(err) => {
                warn!(reason = %err.reason, "Judge unavailable");
                JudgeVerdict {
                    score: None,
                    issues: Vec::new(),
                    outcome: TierOutcome::Unavailable {
                        tier: Tier::Judge,
                        reason: err.reason,
                    },
                    usage: err.usage,
                }
            }
        }
    }
}
