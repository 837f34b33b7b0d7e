//! CLI domain: parse, route, output, and presentation only.
//! No domain orchestration; single route table dispatches to domain services.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::{map_error, CommandOutput};
pub use parse::{command_name, Cli, Commands, RunsCommands};
pub use presentation::{
    format_batch_json, format_batch_text, format_check_json, format_check_text,
    format_report_json, format_report_text, format_run_show_json, format_run_show_text,
    format_runs_list_json, format_runs_list_text, format_section_heading, styled_outcome,
    BatchEntry,
};
pub use route::RunContext;
