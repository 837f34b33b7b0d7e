//! Heuristic check presentation.

use crate::cli::presentation::shared::{format_section_heading, issues_table, to_json};
use crate::error::ApiError;
use crate::evaluation::{HeuristicResult, TierOutcome};

pub fn format_check_text(file: &str, result: &HeuristicResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading(&format!("Check: {}", file))));
    out.push_str(&format!("  Score: {:.1}\n", result.score));
    out.push_str(&format!("  Words: {}\n", result.word_count));
    match result.readability {
        Some(ease) => out.push_str(&format!("  Reading ease: {:.1}\n", ease)),
        None => out.push_str("  Reading ease: -\n"),
    }
    out.push_str(&format!(
        "  Topic coverage: {:.0}%\n",
        result.topic_coverage * 100.0
    ));
    let decision = match &result.outcome {
        TierOutcome::Resolved { verdict, .. } => verdict.to_string(),
        TierOutcome::Escalate { reason, .. } => format!("needs a judge ({})", reason),
        TierOutcome::Unavailable { reason, .. } => format!("unavailable ({})", reason),
    };
    out.push_str(&format!("  Decision: {}\n", decision));
    if result.issues.is_empty() {
        out.push_str("\nNo issues found.\n");
    } else {
        out.push_str(&format!("\n{}\n", issues_table(&result.issues)));
    }
    out
}

pub fn format_check_json(file: &str, result: &HeuristicResult) -> Result<String, ApiError> {
    to_json(&serde_json::json!({ "file": file, "result": result }))
}
