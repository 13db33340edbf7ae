//! Structured logging for the coach
//!
//! Writes daily files `coach-YYYY-MM-DD.log` into the configured log directory,
//! one line per event, tagged with a category:
//! - LEDGER: goal, metric, meal writes
//! - SCHEDULE: plan replacement and task completion
//! - MODEL: external model calls, retries, fallbacks
//! - CONVERSATION: session lifecycle and chat turns
//! - ERROR: failures

use chrono::{Local, Utc};
use once_cell::sync::Lazy;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const RETENTION_DAYS: i64 = 7;

/// Log categories for structured logging
#[derive(Debug, Clone, Copy)]
pub enum LogCategory {
    Ledger,
    Schedule,
    Model,
    Conversation,
    Error,
}

impl LogCategory {
    fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Ledger => "LEDGER",
            LogCategory::Schedule => "SCHEDULE",
            LogCategory::Model => "MODEL",
            LogCategory::Conversation => "CONVERSATION",
            LogCategory::Error => "ERROR",
        }
    }
}

/// Directory for log files; `None` until `init_logging` runs.
static LOG_DIR: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

fn log_file_path(dir: &Path) -> PathBuf {
    let today = Local::now().format("%Y-%m-%d").to_string();
    dir.join(format!("coach-{}.log", today))
}

/// Initialize the logging system - creates the log directory if needed
pub fn init_logging(dir: &Path) -> std::io::Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }

    if let Ok(mut guard) = LOG_DIR.lock() {
        *guard = Some(dir.to_path_buf());
    }

    log(LogCategory::Conversation, None, "Coach logging initialized");
    Ok(())
}

/// Format one log line. `session` is shortened to 8 characters.
pub fn format_line(category: LogCategory, session: Option<&str>, message: &str) -> String {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let session_context = session
        .map(|id| format!("session={} | ", &id[..8.min(id.len())]))
        .unwrap_or_default();

    format!(
        "[{}] [{}] {}{}\n",
        timestamp,
        category.as_str(),
        session_context,
        message
    )
}

/// Log a message with category and optional session context
pub fn log(category: LogCategory, session: Option<&str>, message: &str) {
    let line = format_line(category, session, message);

    // stdout belongs to the chat
    eprint!("{}", line);

    let dir = LOG_DIR.lock().ok().and_then(|guard| guard.clone());
    if let Some(dir) = dir {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file_path(&dir))
        {
            let _ = file.write_all(line.as_bytes());
        }
    }
}

pub fn log_ledger(session: Option<&str>, message: &str) {
    log(LogCategory::Ledger, session, message);
}

pub fn log_schedule(session: Option<&str>, message: &str) {
    log(LogCategory::Schedule, session, message);
}

pub fn log_model(session: Option<&str>, message: &str) {
    log(LogCategory::Model, session, message);
}

pub fn log_conversation(session: Option<&str>, message: &str) {
    log(LogCategory::Conversation, session, message);
}

pub fn log_error(session: Option<&str>, message: &str) {
    log(LogCategory::Error, session, message);
}

/// Clean up old log files (keep last 7 days)
pub fn cleanup_old_logs(dir: &Path) -> std::io::Result<usize> {
    let mut deleted = 0;

    if !dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(RETENTION_DAYS);

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("coach-") && n.ends_with(".log"))
            .unwrap_or(false);
        if !is_log {
            continue;
        }

        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            let modified_time: chrono::DateTime<Utc> = modified.into();
            if modified_time < cutoff && fs::remove_file(&path).is_ok() {
                deleted += 1;
            }
        }
    }

    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_shortens_session() {
        let line = format_line(LogCategory::Ledger, Some("0123456789abcdef"), "Pullups = 15");
        assert!(line.contains("[LEDGER] session=01234567 | Pullups = 15"));
        assert!(line.ends_with('\n'));

        let line = format_line(LogCategory::Error, None, "boom");
        assert!(line.contains("[ERROR] boom"));
    }

    #[test]
    fn test_cleanup_ignores_foreign_and_fresh_files() {
        let dir = std::env::temp_dir().join(format!("coach-logs-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("coach-2099-01-01.log"), "fresh").unwrap();
        fs::write(dir.join("notes.txt"), "keep").unwrap();

        assert_eq!(cleanup_old_logs(&dir).unwrap(), 0);
        assert!(dir.join("notes.txt").exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
