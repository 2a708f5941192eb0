//! Command Line Interface module

pub mod args;
pub mod commands;
pub mod prompt;

pub use args::*;

use anyhow::Result;

use crate::utils::logging::{LogOutput, default_log_file, init_cli_logging};

/// Main CLI application runner
pub async fn run() -> Result<()> {
    let cli = Cli::parse_args();

    let log_file = cli
        .log_file
        .as_ref()
        .map(|path| path.clone().unwrap_or_else(default_log_file));
    let output = match (log_file, cli.json_log) {
        (path, true) => LogOutput::Json(path),
        (Some(path), false) => LogOutput::File(path),
        (None, false) => LogOutput::Stderr,
    };
    init_cli_logging(cli.verbose, cli.quiet, &output)?;

    commands::execute_command(&cli).await
}
