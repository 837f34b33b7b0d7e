//! CLI presentation: text and json formatters per command family.

mod check;
mod report;
mod runs;
mod shared;

pub use check::{format_check_json, format_check_text};
pub use report::{
    format_batch_json, format_batch_text, format_report_json, format_report_text, BatchEntry,
};
pub use runs::{
    format_run_show_json, format_run_show_text, format_runs_list_json, format_runs_list_text,
};
pub use shared::{format_section_heading, styled_outcome};
