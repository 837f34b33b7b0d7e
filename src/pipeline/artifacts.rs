//! Per-stage artifacts. Each one is replaced wholesale on every stage execution.

use crate::evaluation::{EvaluationResult, Issue, Severity, Verdict};
use crate::lesson::Citation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineSection {
    pub heading: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
}

/// Planner output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outline {
    pub title: String,
    pub sections: Vec<OutlineSection>,
}

impl Outline {
    pub fn headings(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.heading.as_str()).collect()
    }
}

/// Expander output for one outline section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpandedSection {
    pub heading: String,
    pub body: String,
}

/// Assembler output: the deterministic merge of all sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledDocument {
    pub title: String,
    pub markdown: String,
    pub citations: Vec<Citation>,
    /// Cross-reference targets that matched no section heading.
    pub unresolved_refs: Vec<String>,
}

const FEEDBACK_ISSUE_LIMIT: usize = 12;

/// Evaluator findings carried into the next planning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub attempt: u32,
    pub verdict: Verdict,
    pub score: f64,
    pub issues: Vec<Issue>,
}

impl Feedback {
    pub fn from_evaluation(attempt: u32, evaluation: &EvaluationResult) -> Self {
        Self {
            attempt,
            verdict: evaluation.verdict,
            score: evaluation.score,
            issues: evaluation.issues.clone(),
        }
    }

    /// Most severe issues first, as prompt bullets.
    pub fn render(&self) -> String {
        let mut issues: Vec<&Issue> = self.issues.iter().collect();
        issues.sort_by_key(|i| match i.severity {
            Severity::Critical => 0,
            Severity::Major => 1,
            Severity::Minor => 2,
        });
        let mut lines = vec![format!(
            "Attempt {} scored {:.0} and was sent back for regeneration.",
            self.attempt, self.score
        )];
        for issue in issues.into_iter().take(FEEDBACK_ISSUE_LIMIT) {
            let mut line = format!("- [{:?}]", issue.severity).to_lowercase();
            if let Some(location) = &issue.location {
                line.push_str(&format!(" {}:", location));
            }
            line.push_str(&format!(" {}", issue.description));
            if let Some(fix) = &issue.suggested_fix {
                line.push_str(&format!(" (fix: {})", fix));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}
