//! Lessonsmith CLI Binary
//!
//! Command-line interface for lesson generation.

use anyhow::Context;
use clap::Parser;
use lessonsmith::cli::{map_error, Cli, RunContext};
use lessonsmith::config::ConfigLoader;
use lessonsmith::logging::{init_logging, LoggingConfig};
use std::process;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging_config = build_logging_config(&cli)?;
    init_logging(&logging_config).context("Failed to initialize logging")?;

    info!("Lessonsmith CLI starting");

    let context = RunContext::new(cli.workspace.clone(), cli.config.clone())
        .map_err(|e| anyhow::anyhow!(map_error(&e)))
        .context("Failed to load configuration")?;

    match context.execute(&cli.command) {
        Ok(output) => {
            println!("{}", output.text);
            if !output.success {
                process::exit(2);
            }
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("{}", map_error(&e));
            process::exit(1);
        }
    }
}

/// Build logging configuration from CLI args, environment, and config file
fn build_logging_config(cli: &Cli) -> anyhow::Result<LoggingConfig> {
    if !cli.verbose {
        return Ok(LoggingConfig::quiet());
    }

    let mut config = match cli.config {
        Some(ref config_path) => ConfigLoader::load_from_file(config_path)
            .map(|c| c.logging)
            .unwrap_or_default(),
        None => ConfigLoader::load(&cli.workspace)
            .map(|c| c.logging)
            .unwrap_or_default(),
    };

    // CLI arguments take precedence
    if let Some(ref level) = cli.log_level {
        config.level = level.clone();
    }
    if let Some(ref format) = cli.log_format {
        config.format = format.parse().map_err(|e| anyhow::anyhow!(map_error(&e)))?;
    }
    if let Some(ref output) = cli.log_output {
        config.output = output.parse().map_err(|e| anyhow::anyhow!(map_error(&e)))?;
    }
    if let Some(ref file) = cli.log_file {
        config.file = Some(file.clone());
    }
    Ok(config)
}
