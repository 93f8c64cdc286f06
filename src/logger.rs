//! tracing-subscriber setup.
//!
//! The console owns stdout, so logs go to stderr or, when `app.log_file` is
//! set, are appended to that file without ANSI colours. Only chatdesk's own
//! events follow the configured level; dependencies (hyper, reqwest,
//! rusqlite) are capped at `warn` unless `RUST_LOG` asks for more.

use std::fs::{File, OpenOptions};
use std::path::Path;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::error::AppError;

/// Install the global subscriber. Call once, after the effective level is
/// known.
///
/// With `prefer_level` (a `-v` flag was given) `level` wins over `RUST_LOG`;
/// otherwise a valid `RUST_LOG` wins and `level` is the fallback.
pub fn init(level: &str, prefer_level: bool, log_file: Option<&Path>) -> Result<(), AppError> {
    let filter = build_filter(level, prefer_level)?;

    let (writer, ansi) = match log_file {
        Some(path) => (BoxMakeWriter::new(open_log_file(path)?), false),
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi)
        .try_init()
        .map_err(|e| AppError::Logger(format!("failed to set subscriber: {e}")))
}

/// `"debug"` → [`LevelFilter::DEBUG`]. Config loading uses this to reject
/// bad levels before anything starts.
pub fn parse_level(level: &str) -> Result<LevelFilter, AppError> {
    if level.trim().is_empty() {
        return Err(AppError::Logger("log level must not be empty".into()));
    }
    level
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| AppError::Logger(format!("unrecognised log level: '{level}'")))
}

fn build_filter(level: &str, prefer_level: bool) -> Result<EnvFilter, AppError> {
    let level = parse_level(level)?;
    if !prefer_level {
        if let Ok(from_env) = EnvFilter::try_from_default_env() {
            return Ok(from_env);
        }
    }

    let deps = level.min(LevelFilter::WARN);
    EnvFilter::try_new(format!("{deps},chatdesk={level}"))
        .map_err(|e| AppError::Logger(format!("invalid filter for level '{level}': {e}")))
}

fn open_log_file(path: &Path) -> Result<File, AppError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| AppError::Logger(format!("failed to open log file '{}': {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_parse_case_insensitively() {
        assert_eq!(parse_level("debug").unwrap(), LevelFilter::DEBUG);
        assert_eq!(parse_level(" WARN ").unwrap(), LevelFilter::WARN);
        assert!(parse_level("verbose").is_err());
        assert!(parse_level("  ").is_err());
    }

    #[test]
    fn filter_follows_our_level() {
        let filter = build_filter("trace", true).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
        let filter = build_filter("error", true).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::ERROR));
    }

    #[test]
    fn bad_level_is_rejected_before_install() {
        assert!(matches!(build_filter("loud", true), Err(AppError::Logger(_))));
    }

    #[test]
    fn unwritable_log_file_errors() {
        let result = init("info", true, Some(Path::new("/nonexistent-dir/chatdesk.log")));
        assert!(matches!(result, Err(AppError::Logger(_))));
    }
}
