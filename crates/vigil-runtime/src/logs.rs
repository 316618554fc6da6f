//! Container log storage and line classification.
//!
//! Both backends produce the same entry shape: a timestamp, a severity
//! picked by keyword, and the message prefixed with `[containerName]`.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime};
use vigil_common::constants::LOG_FILE;
use vigil_common::error::{Result, VigilError};
use vigil_common::types::{LogEntry, LogLevel};

const NAIVE_TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Returns the log file path inside a container directory.
#[must_use]
pub fn log_path(container_dir: &Path) -> PathBuf {
    container_dir.join(LOG_FILE)
}

/// Wall-clock time in the format used for substituted timestamps.
#[must_use]
pub fn now_timestamp() -> String {
    chrono::Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

/// Reads the last `tail` non-empty lines of a log file.
///
/// Returns an empty list if the log file does not exist yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_tail(path: &Path, tail: usize) -> Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| VigilError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let skip = lines.len().saturating_sub(tail);
    Ok(lines[skip..].iter().map(|l| (*l).to_string()).collect())
}

/// Appends a line to a log file, creating it if needed.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or written.
pub fn append_log(path: &Path, line: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| VigilError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
    writeln!(file, "{line}").map_err(|e| VigilError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Appends a timestamped INFO line describing a lifecycle event.
///
/// # Errors
///
/// Returns an error if the log file cannot be written.
pub fn append_event(path: &Path, message: &str) -> Result<()> {
    append_log(path, &format!("{} INFO {message}", now_timestamp()))
}

/// Picks a severity by keyword, highest priority first.
#[must_use]
pub fn classify(message: &str) -> LogLevel {
    if ["ERROR", "FATAL", "EXCEPTION"]
        .iter()
        .any(|kw| message.contains(kw))
    {
        LogLevel::Error
    } else if message.contains("WARN") {
        LogLevel::Warn
    } else if message.contains("DEBUG") {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}

fn is_timestamp(token: &str) -> bool {
    DateTime::parse_from_rfc3339(token).is_ok()
        || NaiveDateTime::parse_from_str(token, NAIVE_TIMESTAMP).is_ok()
}

/// Splits a leading timestamp token from the rest of the line.
#[must_use]
pub fn split_timestamp(line: &str) -> Option<(&str, &str)> {
    let (token, rest) = line.split_once(' ')?;
    is_timestamp(token).then_some((token, rest))
}

/// Turns one raw line into a log entry for `container_name`.
///
/// Lines without a parseable leading timestamp keep their full text, get
/// `now` as their timestamp, and are always INFO.
#[must_use]
pub fn parse_line(container_name: &str, line: &str, now: &str) -> LogEntry {
    match split_timestamp(line) {
        Some((timestamp, message)) => LogEntry {
            timestamp: timestamp.to_string(),
            level: classify(message),
            message: format!("[{container_name}] {message}"),
        },
        None => LogEntry {
            timestamp: now.to_string(),
            level: LogLevel::Info,
            message: format!("[{container_name}] {line}"),
        },
    }
}

/// Classifies every non-blank line.
#[must_use]
pub fn parse_lines<I, S>(container_name: &str, lines: I) -> Vec<LogEntry>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let now = now_timestamp();
    lines
        .into_iter()
        .filter(|line| !line.as_ref().trim().is_empty())
        .map(|line| parse_line(container_name, line.as_ref().trim_end(), &now))
        .collect()
}
