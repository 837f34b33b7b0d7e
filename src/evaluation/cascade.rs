//! Tier escalation and result aggregation.

use crate::evaluation::{
    CascadeConfig, DocumentEvaluator, EvaluationResult, HeuristicFilter, Issue, MultiRaterEnsemble,
    RubricRater, SingleJudge, Tier, TierOutcome, TierRecord,
};
use crate::lesson::{LessonDocument, LessonSpec};
use crate::usage::{CostSummary, MeteredClient, UsageRecord};
use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Everything collected from the tiers that ran.
#[derive(Default)]
struct Collected {
    issues: Vec<Issue>,
    trail: Vec<TierRecord>,
    usage: Vec<UsageRecord>,
    score: f64,
    tier_reached: Option<Tier>,
}

impl Collected {
    fn record(
        &mut self,
        outcome: &TierOutcome,
        score: Option<f64>,
        issues: Vec<Issue>,
        usage: Vec<UsageRecord>,
    ) {
        let tier = outcome.tier();
        if let Some(score) = score {
            self.score = score;
        }
        self.trail.push(TierRecord {
            tier,
            score,
            outcome: outcome.label(),
            cost: CostSummary::from_records(&usage),
        });
        self.issues.extend(issues);
        self.usage.extend(usage);
        self.tier_reached = Some(tier);
    }
}

/// Same finding reported by several tiers counts once.
fn dedupe_issues(issues: Vec<Issue>) -> Vec<Issue> {
    let mut seen = HashSet::new();
    issues
        .into_iter()
        .filter(|issue| {
            seen.insert((
                issue.severity,
                issue.location.clone().unwrap_or_default().to_lowercase(),
                issue.description.trim().to_lowercase(),
            ))
        })
        .collect()
}

pub struct CascadeEvaluator {
    heuristic: HeuristicFilter,
    judge: SingleJudge,
    ensemble: MultiRaterEnsemble,
}

impl CascadeEvaluator {
    pub fn new(client: MeteredClient, config: CascadeConfig) -> Self {
        let rater = RubricRater::new(client);
        Self {
            heuristic: HeuristicFilter::new(config.clone()),
            judge: SingleJudge::new(rater.clone(), config.clone()),
            ensemble: MultiRaterEnsemble::new(rater, config),
        }
    }

    pub fn heuristic(&self) -> &HeuristicFilter {
        &self.heuristic
    }
}

#[async_trait]
impl DocumentEvaluator for CascadeEvaluator {
    async fn evaluate(&self, document: &LessonDocument, spec: &LessonSpec) -> EvaluationResult {
        let mut collected = Collected::default();

        let tier1 = self.heuristic.filter(document, spec);
        debug!(
            score = tier1.score,
            issues = tier1.issues.len(),
            words = tier1.word_count,
            "Heuristic filter finished"
        );
        collected.record(
            &tier1.outcome,
            Some(tier1.score),
            tier1.issues.clone(),
            Vec::new(),
        );

        let mut outcome = tier1.outcome.clone();
        let verdict = loop {
            match outcome {
                TierOutcome::Resolved { verdict, .. } => break verdict,
                TierOutcome::Escalate {
                    tier: Tier::Heuristic,
                    ..
                }
                | TierOutcome::Unavailable {
                    tier: Tier::Heuristic,
                    ..
                } => {
                    let judged = self.judge.judge(document, spec, &tier1.issues).await;
                    collected.record(
                        &judged.outcome,
                        judged.score,
                        judged.issues,
                        vec![judged.usage],
                    );
                    outcome = judged.outcome;
                }
                TierOutcome::Escalate {
                    tier: Tier::Judge, ..
                }
                | TierOutcome::Unavailable {
                    tier: Tier::Judge, ..
                } => {
                    if let TierOutcome::Unavailable { reason, .. } = &outcome {
                        warn!(reason = %reason, "Judge unavailable, escalating to ensemble");
                    }
                    let voted = self.ensemble.vote(document, spec).await;
                    collected.record(
                        &voted.outcome,
                        voted.median_score,
                        voted.issues(),
                        voted.usage.clone(),
                    );
                    outcome = voted.outcome;
                }
                TierOutcome::Escalate {
                    tier: Tier::Ensemble,
                    ..
                }
                | TierOutcome::Unavailable {
                    tier: Tier::Ensemble,
                    ..
                } => {
                    let fallback = self.heuristic.fallback_verdict(&tier1);
                    warn!(verdict = %fallback, "Ensemble unavailable, using heuristic verdict");
                    collected.score = tier1.score;
                    break fallback;
                }
            }
        };

        let cost = CostSummary::from_records(&collected.usage);
        let tier_reached = collected.tier_reached.unwrap_or(Tier::Heuristic);
        info!(
            verdict = %verdict,
            score = collected.score,
            tier = %tier_reached,
            tokens = cost.tokens,
            cost_usd = cost.cost_usd,
            "Evaluation complete"
        );

        EvaluationResult {
            score: collected.score,
            verdict,
            issues: dedupe_issues(collected.issues),
            tier_reached,
            cost,
            trail: collected.trail,
            usage: collected.usage,
        }
    }
}
