//! Logging initialisation via tracing-subscriber.
//!
//! The host bootstrap calls [`init`] once, before provisioning runs.

use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::AppError;

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` wins when set and valid; otherwise `level` applies. Output goes
/// to stderr unless `log_file` is given, in which case it is appended there.
pub fn init(level: &str, log_file: Option<&Path>) -> Result<(), AppError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| AppError::Logger(format!("invalid log level '{level}': {e}")))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer(log_file)?)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

fn make_writer(log_file: Option<&Path>) -> Result<BoxMakeWriter, AppError> {
    let Some(path) = log_file else {
        return Ok(BoxMakeWriter::new(std::io::stderr));
    };
    // The log may live under the data dir, which provisioning hasn't created yet.
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            AppError::Logger(format!("cannot create log directory '{}': {e}", parent.display()))
        })?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::Logger(format!("failed to open log file '{}': {e}", path.display())))?;
    Ok(BoxMakeWriter::new(file))
}

/// Parse a log level string into a [`LevelFilter`], returning an error on
/// unrecognised values.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}
