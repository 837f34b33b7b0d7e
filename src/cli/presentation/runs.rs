//! Stored run presentation: `runs list` and `runs show`.

use crate::cli::presentation::report::trace_table;
use crate::cli::presentation::shared::{
    format_cost, format_section_heading, issues_table, styled_outcome, to_json,
};
use crate::error::ApiError;
use crate::store::RunRecord;
use crate::telemetry::TransitionEvent;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde_json::json;

pub fn format_runs_list_text(records: &[RunRecord]) -> String {
    if records.is_empty() {
        return "No runs recorded.\n\nUse 'lessonsmith generate' to run a lesson.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec![
        "Course", "Lesson", "Outcome", "Attempts", "Retries", "Tokens", "Cost", "Updated",
    ]);
    for record in records {
        table.add_row(vec![
            record.course_id.clone(),
            record.lesson_id.clone(),
            styled_outcome(record.phase, record.verdict),
            record.attempts.to_string(),
            record.retry_count.to_string(),
            record.total_tokens.to_string(),
            format_cost(record.total_cost_usd),
            record.updated_at.clone(),
        ]);
    }
    format!(
        "{}\n\n{}\n\nTotal: {} run(s)\n",
        format_section_heading("Runs"),
        table,
        records.len()
    )
}

pub fn format_runs_list_json(records: &[RunRecord]) -> Result<String, ApiError> {
    let runs: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            json!({
                "course_id": r.course_id,
                "lesson_id": r.lesson_id,
                "phase": r.phase,
                "verdict": r.verdict,
                "failure": r.failure,
                "attempts": r.attempts,
                "retry_count": r.retry_count,
                "total_tokens": r.total_tokens,
                "total_cost_usd": r.total_cost_usd,
                "updated_at": r.updated_at,
            })
        })
        .collect();
    to_json(&json!({ "runs": runs, "total": records.len() }))
}

pub fn format_run_show_text(record: &RunRecord, events: &[TransitionEvent]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n\n",
        format_section_heading(&format!("Run {}/{}", record.course_id, record.lesson_id))
    ));
    out.push_str(&format!(
        "  Outcome: {}\n",
        styled_outcome(record.phase, record.verdict)
    ));
    if let Some(failure) = &record.failure {
        out.push_str(&format!("  Failure: {}\n", failure));
    }
    out.push_str(&format!("  Attempts: {}\n", record.attempts));
    out.push_str(&format!("  Retries: {}\n", record.retry_count));
    out.push_str(&format!("  Tokens: {}\n", record.total_tokens));
    out.push_str(&format!("  Cost: {}\n", format_cost(record.total_cost_usd)));
    out.push_str(&format!("  Updated: {}\n", record.updated_at));
    match &record.terminal_content {
        Some(document) => out.push_str(&format!(
            "  Document: {} words, {}\n",
            document.word_count,
            document.short_fingerprint()
        )),
        None => out.push_str("  Document: none\n"),
    }
    if !record.issues.is_empty() {
        out.push_str(&format!(
            "\n{}\n\n{}\n",
            format_section_heading("Issues"),
            issues_table(&record.issues)
        ));
    }
    let trace = if events.is_empty() {
        record.trace.as_slice()
    } else {
        events
    };
    if !trace.is_empty() {
        out.push_str(&format!(
            "\n{}\n\n{}\n",
            format_section_heading("Trace"),
            trace_table(trace)
        ));
    }
    out
}

pub fn format_run_show_json(
    record: &RunRecord,
    events: &[TransitionEvent],
) -> Result<String, ApiError> {
    to_json(&json!({ "record": record, "events": events }))
}
