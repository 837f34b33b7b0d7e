//! CLI parse: clap types for lessonsmith. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lessonsmith CLI - lesson generation with a cost-aware quality cascade
#[derive(Parser)]
#[command(name = "lessonsmith")]
#[command(about = "Generate lesson documents through plan, expand, assemble, smooth and evaluate")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate one lesson from a spec file
    Generate {
        /// Lesson spec (TOML)
        spec: PathBuf,
        /// Course the lesson belongs to
        #[arg(long)]
        course: String,
        /// Write the accepted lesson markdown here
        #[arg(long)]
        out: Option<PathBuf>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Generate many lessons through the worker pool
    Batch {
        /// Lesson spec files (TOML)
        #[arg(required = true)]
        specs: Vec<PathBuf>,
        #[arg(long)]
        course: String,
        /// Directory receiving one `<lesson_id>.md` per accepted lesson
        #[arg(long)]
        out_dir: Option<PathBuf>,
        /// Concurrent lessons (defaults to queue.workers)
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Run the offline heuristic checks over a markdown file
    Check {
        /// Markdown lesson
        file: PathBuf,
        /// Spec to check length, topics and required sections against
        #[arg(long)]
        spec: Option<PathBuf>,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Inspect stored runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
}

#[derive(Subcommand)]
pub enum RunsCommands {
    /// List stored runs, newest first
    List {
        /// Only runs of this course
        #[arg(long)]
        course: Option<String>,
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show one run with its transition trace
    Show {
        #[arg(long)]
        course: String,
        #[arg(long)]
        lesson: String,
        #[arg(long, default_value = "text")]
        format: String,
    },
}

/// Stable command name for logs.
pub fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Generate { .. } => "generate",
        Commands::Batch { .. } => "batch",
        Commands::Check { .. } => "check",
        Commands::Runs {
            command: RunsCommands::List { .. },
        } => "runs list",
        Commands::Runs {
            command: RunsCommands::Show { .. },
        } => "runs show",
    }
}
