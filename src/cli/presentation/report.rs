//! Run report presentation for `generate` and `batch`.

use crate::cli::presentation::shared::{
    format_cost, format_section_heading, issues_table, styled_outcome, to_json,
};
use crate::error::ApiError;
use crate::pipeline::RunReport;
use crate::telemetry::TransitionEvent;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde_json::json;
use std::sync::Arc;

/// One job of a batch, as reported by the worker pool.
pub struct BatchEntry {
    pub job_id: String,
    pub outcome: Result<Arc<RunReport>, String>,
}

pub(super) fn trace_table(trace: &[TransitionEvent]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["#", "Transition", "Attempt", "Tokens", "Cost", "Detail"]);
    for event in trace {
        table.add_row(vec![
            event.seq.to_string(),
            format!("{} -> {}", event.from, event.to),
            event.attempt.to_string(),
            event.tokens_delta.to_string(),
            format_cost(event.cost_delta_usd),
            event.detail.clone().unwrap_or_default(),
        ]);
    }
    table
}

pub fn format_report_text(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading(&format!("Lesson {}", report.lesson_id))
    ));
    out.push_str(&format!("  Course: {}\n", report.course_id));
    out.push_str(&format!(
        "  Outcome: {}\n",
        styled_outcome(report.phase, report.verdict)
    ));
    out.push_str(&format!("  Attempts: {}\n", report.attempts));
    out.push_str(&format!("  Retries: {}\n", report.retry_count));
    out.push_str(&format!("  Tokens: {}\n", report.cost.tokens));
    out.push_str(&format!("  Cost: {}\n", format_cost(report.cost.cost_usd)));
    if let Some(evaluation) = &report.evaluation {
        out.push_str(&format!(
            "  Last evaluation: {:.1} at {}\n",
            evaluation.score, evaluation.tier_reached
        ));
    }
    if let Some(document) = &report.document {
        out.push_str(&format!(
            "  Document: {} words, {}\n",
            document.word_count,
            document.short_fingerprint()
        ));
    }
    if let Some(failure) = &report.failure {
        out.push_str(&format!("  Failure: {}\n", failure.reason));
        if let Some(candidate) = &failure.last_candidate {
            out.push_str(&format!(
                "  Last candidate: {} words, {}\n",
                candidate.word_count,
                candidate.short_fingerprint()
            ));
        }
    }
    if let Some(evaluation) = &report.evaluation {
        if !evaluation.issues.is_empty() {
            out.push_str(&format!(
                "\n{}\n\n{}\n",
                format_section_heading("Issues"),
                issues_table(&evaluation.issues)
            ));
        }
    }
    if !report.trace.is_empty() {
        out.push_str(&format!(
            "\n{}\n\n{}\n",
            format_section_heading("Trace"),
            trace_table(&report.trace)
        ));
    }
    out
}

fn report_value(report: &RunReport) -> serde_json::Value {
    json!({
        "course_id": report.course_id,
        "lesson_id": report.lesson_id,
        "phase": report.phase,
        "verdict": report.verdict,
        "attempts": report.attempts,
        "retry_count": report.retry_count,
        "cost": report.cost,
        "document": report.document,
        "failure": report.failure,
        "evaluation": report.evaluation,
        "trace": report.trace,
        "errors": report.errors,
    })
}

pub fn format_report_json(report: &RunReport) -> Result<String, ApiError> {
    to_json(&report_value(report))
}

pub fn format_batch_text(entries: &[BatchEntry]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n\n", format_section_heading("Batch")));
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Job", "Outcome", "Attempts", "Tokens", "Cost", "Reason"]);
    let mut accepted = 0;
    let mut tokens = 0u64;
    let mut cost = 0.0;
    for entry in entries {
        match &entry.outcome {
            Ok(report) => {
                if report.is_accepted() {
                    accepted += 1;
                }
                tokens += report.cost.tokens;
                cost += report.cost.cost_usd;
                let reason = report
                    .failure
                    .as_ref()
                    .map(|f| f.reason.to_string())
                    .unwrap_or_default();
                table.add_row(vec![
                    entry.job_id.clone(),
                    styled_outcome(report.phase, report.verdict),
                    report.attempts.to_string(),
                    report.cost.tokens.to_string(),
                    format_cost(report.cost.cost_usd),
                    reason,
                ]);
            }
            Err(err) => {
                table.add_row(vec![
                    entry.job_id.clone(),
                    "error".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    "-".to_string(),
                    err.clone(),
                ]);
            }
        }
    }
    out.push_str(&format!("{}\n\n", table));
    out.push_str(&format!(
        "Accepted {} of {} lesson(s), {} tokens, {}\n",
        accepted,
        entries.len(),
        tokens,
        format_cost(cost)
    ));
    out
}

pub fn format_batch_json(entries: &[BatchEntry]) -> Result<String, ApiError> {
    let jobs: Vec<serde_json::Value> = entries
        .iter()
        .map(|entry| match &entry.outcome {
            Ok(report) => json!({ "job_id": entry.job_id, "report": report_value(report) }),
            Err(err) => json!({ "job_id": entry.job_id, "error": err }),
        })
        .collect();
    to_json(&json!({ "jobs": jobs, "total": entries.len() }))
}
