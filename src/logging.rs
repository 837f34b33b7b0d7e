//! Logging System
//!
//! Structured logging with the `tracing` crate. Level, format and destination come from the
//! `[logging]` config section and may be overridden by `LESSONSMITH_LOG`,
//! `LESSONSMITH_LOG_MODULES`, `LESSONSMITH_LOG_FORMAT` and `LESSONSMITH_LOG_OUTPUT`.
//!
//! Every lesson run executes inside a [`run_span`], so concurrent runs in the job queue can be
//! told apart in interleaved output.

use crate::error::ApiError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::Span;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt as layer_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Line format of emitted records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Where records are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    Stdout,
    /// Keeps stdout free for command output.
    #[default]
    Stderr,
    File,
}

impl FromStr for LogFormat {
    type Err = ApiError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(ApiError::ConfigError(format!(
                "Invalid log format: {} (must be 'json' or 'text')",
                other
            ))),
        }
    }
}

impl FromStr for LogTarget {
    type Err = ApiError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stdout" => Ok(LogTarget::Stdout),
            "stderr" => Ok(LogTarget::Stderr),
            "file" => Ok(LogTarget::File),
            other => Err(ApiError::ConfigError(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr' or 'file')",
                other
            ))),
        }
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogTarget::Stdout => "stdout",
            LogTarget::Stderr => "stderr",
            LogTarget::File => "file",
        })
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error or off
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub output: LogTarget,
    /// Used when `output = "file"`; defaults to [`default_log_file`].
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// ANSI colors for text records on a terminal.
    #[serde(default = "default_color")]
    pub color: bool,
    /// Per-target levels, e.g. `"lessonsmith::queue" = "debug"`.
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_color() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
            output: LogTarget::default(),
            file: None,
            color: default_color(),
            modules: BTreeMap::new(),
        }
    }
}

impl LoggingConfig {
    /// Silences everything; used when the CLI runs without `--verbose`.
    pub fn quiet() -> Self {
        Self {
            level: "off".to_string(),
            ..Self::default()
        }
    }

    /// Apply `LESSONSMITH_LOG_FORMAT` and `LESSONSMITH_LOG_OUTPUT`.
    fn with_env_overrides(&self) -> Result<Self, ApiError> {
        let mut effective = self.clone();
        if let Ok(raw) = std::env::var("LESSONSMITH_LOG_FORMAT") {
            effective.format = raw.parse()?;
        }
        if let Ok(raw) = std::env::var("LESSONSMITH_LOG_OUTPUT") {
            effective.output = raw.parse()?;
        }
        Ok(effective)
    }

    fn filter(&self) -> Result<EnvFilter, ApiError> {
        if let Ok(filter) = EnvFilter::try_from_env("LESSONSMITH_LOG") {
            return Ok(filter);
        }
        if self.level == "off" {
            return Ok(EnvFilter::new("off"));
        }

        let mut directives: Vec<String> = self
            .modules
            .iter()
            .map(|(target, level)| format!("{}={}", target, level))
            .collect();
        if let Ok(raw) = std::env::var("LESSONSMITH_LOG_MODULES") {
            directives.extend(parse_module_directives(&raw));
        }

        directives.into_iter().try_fold(EnvFilter::new(&self.level), |filter, directive| {
            directive
                .parse::<Directive>()
                .map(|d| filter.add_directive(d))
                .map_err(|e| ApiError::ConfigError(format!("Invalid log directive '{}': {}", directive, e)))
        })
    }

    fn writer(&self) -> Result<BoxMakeWriter, ApiError> {
        Ok(match self.output {
            LogTarget::Stdout => BoxMakeWriter::new(std::io::stdout),
            LogTarget::Stderr => BoxMakeWriter::new(std::io::stderr),
            LogTarget::File => {
                let path = self.file.clone().unwrap_or_else(default_log_file);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        ApiError::ConfigError(format!("Failed to create log directory: {}", e))
                    })?;
                }
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| {
                        ApiError::ConfigError(format!("Failed to open log file {}: {}", path.display(), e))
                    })?;
                BoxMakeWriter::new(Mutex::new(file))
            }
        })
    }
}

/// `$XDG_DATA_HOME/lessonsmith/lessonsmith.log`, or a workspace-local fallback.
pub fn default_log_file() -> PathBuf {
    ProjectDirs::from("", "", "lessonsmith")
        .map(|dirs| dirs.data_dir().join("lessonsmith.log"))
        .unwrap_or_else(|| PathBuf::from(".lessonsmith/lessonsmith.log"))
}

/// Install the global subscriber. Environment variables win over the config section.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ApiError> {
    let config = config.with_env_overrides()?;
    let filter = config.filter()?;
    let writer = config.writer()?;
    let registry = Registry::default().with(filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                layer_fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(
                layer_fmt::layer()
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(config.color && config.output != LogTarget::File)
                    .with_writer(writer),
            )
            .try_init(),
    };
    installed.map_err(|e| ApiError::ConfigError(format!("Failed to install logger: {}", e)))
}

/// Span wrapping one lesson run.
pub fn run_span(course_id: &str, lesson_id: &str) -> Span {
    tracing::info_span!("lesson_run", course_id = %course_id, lesson_id = %lesson_id)
}

/// `module=level` pairs separated by commas; malformed entries are skipped.
fn parse_module_directives(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|pair| {
            let (module, level) = pair.split_once('=')?;
            let (module, level) = (module.trim(), level.trim());
            (!module.is_empty() && !level.is_empty()).then(|| format!("{}={}", module, level))
        })
        .collect()
}
