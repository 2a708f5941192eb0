//! Logging initialization for the provisioning CLI

use anyhow::Result;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Where log records are written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// Human readable lines on stderr
    Stderr,
    /// Human readable lines appended to a file
    File(PathBuf),
    /// One JSON object per line, to a file or stdout
    Json(Option<PathBuf>),
}

/// Map `-q` / `-v` flags to a level filter
pub fn level_for(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

/// Initialize logging for the CLI
pub fn init_cli_logging(verbose: u8, quiet: bool, output: &LogOutput) -> Result<()> {
    let level = level_for(verbose, quiet);

    match output {
        LogOutput::Stderr => {
            Builder::from_default_env()
                .target(Target::Stderr)
                .filter_level(level)
                .format_timestamp_secs()
                .format_module_path(false)
                .init();
        }
        LogOutput::File(path) => init_file_logging(path, level)?,
        LogOutput::Json(path) => init_json_logging(path.as_deref(), level)?,
    }

    #[cfg(debug_assertions)]
    log_panics::init();

    log::debug!("Logging initialized with level: {:?}", level);
    Ok(())
}

/// Default log file location for unattended factory stations
pub fn default_log_file() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ms500-provision")
        .join("logs")
        .join("provision.log")
}

/// Append `timestamp [LEVEL] module: message` lines to `path`
pub fn init_file_logging(path: &Path, level: LevelFilter) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;

    Builder::from_default_env()
        .target(Target::Pipe(Box::new(file)))
        .filter_level(level)
        .format_timestamp_secs()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                buf.timestamp(),
                record.level(),
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        })
        .init();

    Ok(())
}

/// One JSON object per record, appended to `path` or written to stdout
pub fn init_json_logging(path: Option<&Path>, level: LevelFilter) -> Result<()> {
    use chrono::Utc;

    let target: Box<dyn Write + Send> = match path {
        Some(path) => Box::new(OpenOptions::new().create(true).append(true).open(path)?),
        None => Box::new(std::io::stdout()),
    };

    Builder::from_default_env()
        .target(Target::Pipe(target))
        .filter_level(level)
        .format(|buf, record| {
            let json = serde_json::json!({
                "timestamp": Utc::now().to_rfc3339(),
                "level": record.level().to_string(),
                "module": record.module_path().unwrap_or("unknown"),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", json)
        })
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_selection() {
        assert_eq!(level_for(0, true), LevelFilter::Error);
        assert_eq!(level_for(3, true), LevelFilter::Error);
        assert_eq!(level_for(0, false), LevelFilter::Info);
        assert_eq!(level_for(1, false), LevelFilter::Debug);
        assert_eq!(level_for(2, false), LevelFilter::Trace);
    }

    #[test]
    fn test_default_log_file_name() {
        assert!(default_log_file().ends_with("logs/provision.log"));
    }
}
