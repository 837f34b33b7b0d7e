//! Tier 3: independent raters voting concurrently, with a tie-break on disagreement.

use crate::evaluation::judge::{RaterError, RaterReport, RubricRater};
use crate::evaluation::{CascadeConfig, Issue, Tier, TierOutcome, Verdict};
use crate::lesson::{LessonDocument, LessonSpec};
use crate::usage::UsageRecord;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RaterVote {
    pub rater_id: String,
    pub score: f64,
    pub verdict: Verdict,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleVerdict {
    pub votes: Vec<RaterVote>,
    /// Raters that timed out or failed, with the reason.
    pub excluded: Vec<(String, String)>,
    pub tie_break_used: bool,
    pub quorum_met: bool,
    pub median_score: Option<f64>,
    pub usage: Vec<UsageRecord>,
    pub outcome: TierOutcome,
}

impl EnsembleVerdict {
    pub fn issues(&self) -> Vec<Issue> {
        self.votes.iter().flat_map(|v| v.issues.clone()).collect()
    }
}

pub fn median(scores: &[f64]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

fn spread(votes: &[RaterVote]) -> f64 {
    let max = votes.iter().map(|v| v.score).fold(f64::MIN, f64::max);
    let min = votes.iter().map(|v| v.score).fold(f64::MAX, f64::min);
    max - min
}

/// Strict majority of verdicts, if any.
pub fn majority(votes: &[RaterVote]) -> Option<(Verdict, usize)> {
    let mut counts: HashMap<Verdict, usize> = HashMap::new();
    for vote in votes {
        *counts.entry(vote.verdict).or_default() += 1;
    }
    counts
        .into_iter()
        .find(|(_, count)| count * 2 > votes.len())
}

pub struct MultiRaterEnsemble {
    rater: RubricRater,
    config: CascadeConfig,
}

impl MultiRaterEnsemble {
    pub const TIE_BREAK_ID: &'static str = "tie-break";

    pub fn new(rater: RubricRater, config: CascadeConfig) -> Self {
        Self { rater, config }
    }

    pub fn rater_ids(&self) -> Vec<String> {
        (1..=self.config.raters)
            .map(|i| format!("rater-{}", i))
            .collect()
    }

    /// A rater's own verdict from its score.
    pub fn classify(&self, score: f64) -> Verdict {
        if score >= self.config.ensemble_accept {
            Verdict::Accept
        } else if score < self.config.reject_floor {
            Verdict::Reject
        } else {
            Verdict::Regenerate
        }
    }

    /// One rater under the per-rater timeout. A timed-out rater comes back as an error and is
    /// excluded from the vote; its metered usage is kept.
    async fn rate_with_timeout(
        &self,
        document: &LessonDocument,
        spec: &LessonSpec,
        rater_id: String,
    ) -> Result<RaterReport, RaterError> {
        let timeout = Duration::from_secs(self.config.rater_timeout_secs);
        self.rater
            .rate(document, spec, &[], &rater_id, Tier::Ensemble, timeout)
            .await
    }

    fn absorb(
        &self,
        result: Result<RaterReport, RaterError>,
        votes: &mut Vec<RaterVote>,
        excluded: &mut Vec<(String, String)>,
        usage: &mut Vec<UsageRecord>,
    ) {
        match result {
            Ok(report) => {
                usage.push(report.usage);
                votes.push(RaterVote {
                    verdict: self.classify(report.score),
                    rater_id: report.rater_id,
                    score: report.score,
                    issues: report.issues,
                });
            }
            Err(err) => {
                warn!(rater = %err.rater_id, reason = %err.reason, "Rater excluded from vote");
                usage.push(err.usage);
                excluded.push((err.rater_id, err.reason));
            }
        }
    }

    pub async fn vote(&self, document: &LessonDocument, spec: &LessonSpec) -> EnsembleVerdict {
        let mut votes = Vec::new();
        let mut excluded = Vec::new();
        let mut usage = Vec::new();

        let mut pending = FuturesUnordered::new();
        for rater_id in self.rater_ids() {
            pending.push(self.rate_with_timeout(document, spec, rater_id));
        }
        while let Some(result) = pending.next().await {
            self.absorb(result, &mut votes, &mut excluded, &mut usage);
        }
        // Completion order is arbitrary.
        votes.sort_by(|a, b| a.rater_id.cmp(&b.rater_id));

        let quorum = self.config.quorum();
        if votes.len() < quorum {
            warn!(
                responded = votes.len(),
                quorum, "Ensemble quorum not met"
            );
            return EnsembleVerdict {
                median_score: median(&votes.iter().map(|v| v.score).collect::<Vec<_>>()),
                outcome: TierOutcome::Unavailable {
                    tier: Tier::Ensemble,
                    reason: format!(
                        "quorum not met: {} of {} raters responded",
                        votes.len(),
                        self.config.raters
                    ),
                },
                votes,
                excluded,
                tie_break_used: false,
                quorum_met: false,
                usage,
            };
        }

        let mut tie_break_used = false;
        if votes.len() >= 2 && spread(&votes) > self.config.disagreement_tolerance {
            debug!(spread = spread(&votes), "Raters disagree, running tie-break");
            tie_break_used = true;
            let result = self
                .rate_with_timeout(document, spec, Self::TIE_BREAK_ID.to_string())
                .await;
            self.absorb(result, &mut votes, &mut excluded, &mut usage);
        }

        let scores: Vec<f64> = votes.iter().map(|v| v.score).collect();
        let median_score = median(&scores);
        let (verdict, confidence) = match majority(&votes) {
            Some((verdict, count)) => (verdict, count as f64 / votes.len() as f64),
            None => {
                let score = median_score.unwrap_or(0.0);
                (self.classify(score), 0.5)
            }
        };
        info!(
            votes = votes.len(),
            excluded = excluded.len(),
            tie_break_used,
            verdict = %verdict,
            "Ensemble vote complete"
        );

        EnsembleVerdict {
            votes,
            excluded,
            tie_break_used,
            quorum_met: true,
            median_score,
            usage,
            outcome: TierOutcome::Resolved {
                tier: Tier::Ensemble,
                verdict,
                confidence,
            },
        }
    }
}
