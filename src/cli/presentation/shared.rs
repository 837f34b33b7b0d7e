//! Shared presentation: headings, outcome styling, issue tables, json encoding.

use crate::error::{ApiError, StorageError};
use crate::evaluation::{Issue, Severity, Verdict};
use crate::pipeline::RunPhase;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde::Serialize;

/// Format a section heading with bold/underline.
pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

/// Final phase, colored: accepted green, rejected red, anything else yellow.
pub fn styled_outcome(phase: RunPhase, verdict: Option<Verdict>) -> String {
    let label = match verdict {
        Some(verdict) => format!("{} ({})", phase, verdict),
        None => phase.to_string(),
    };
    match phase {
        RunPhase::Accepted => format!("{}", label.green()),
        RunPhase::Rejected => format!("{}", label.red()),
        _ => format!("{}", label.yellow()),
    }
}

fn styled_severity(severity: Severity) -> String {
    match severity {
        Severity::Critical => format!("{}", severity.as_str().red()),
        Severity::Major => format!("{}", severity.as_str().yellow()),
        Severity::Minor => severity.as_str().to_string(),
    }
}

pub(super) fn issues_table(issues: &[Issue]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Severity", "Tier", "Location", "Issue"]);
    for issue in issues {
        table.add_row(vec![
            styled_severity(issue.severity),
            issue.tier.number().to_string(),
            issue.location.clone().unwrap_or_else(|| "-".to_string()),
            issue.description.clone(),
        ]);
    }
    table
}

pub(super) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ApiError::StorageError(StorageError::Serialization(e.to_string())))
}

pub(super) fn format_cost(cost_usd: f64) -> String {
    format!("${:.4}", cost_usd)
}
