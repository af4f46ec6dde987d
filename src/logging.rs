//! Logging for the transfer engine.
//!
//! Two pieces live here:
//! - [`init_tracing`] installs the process-wide `tracing` subscriber for the CLI.
//! - [`ImportLogger`] is the per-run logger. Every entry goes to `tracing`
//!   and to an in-process log that travels with progress snapshots and the
//!   final import result, so callers can reconcile a run without scraping
//!   stderr.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Severity of an import log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Atomic level filter shared between loggers.
pub struct LogLevelFilter(AtomicU8);

impl LogLevelFilter {
    pub fn new(level: LogLevel) -> Self {
        Self(AtomicU8::new(level_to_u8(level)))
    }

    pub fn get(&self) -> LogLevel {
        u8_to_level(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, level: LogLevel) {
        self.0.store(level_to_u8(level), Ordering::Relaxed);
    }

    /// Check if a message at the given level should be recorded.
    pub fn should_log(&self, level: LogLevel) -> bool {
        level_to_u8(level) >= self.0.load(Ordering::Relaxed)
    }
}

impl Default for LogLevelFilter {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

fn level_to_u8(level: LogLevel) -> u8 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warning => 2,
        LogLevel::Error => 3,
    }
}

fn u8_to_level(val: u8) -> LogLevel {
    match val {
        0 => LogLevel::Debug,
        1 => LogLevel::Info,
        2 => LogLevel::Warning,
        _ => LogLevel::Error,
    }
}

/// Convert an import log level to a tracing level.
pub fn log_level_to_tracing(level: LogLevel) -> Level {
    match level {
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warning => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

/// One line of an import's in-process log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Per-run logger writing to tracing and to an in-process entry list.
#[derive(Clone)]
pub struct ImportLogger {
    level_filter: Arc<LogLevelFilter>,
    name: Option<String>,
    entries: Vec<LogEntry>,
}

impl ImportLogger {
    pub fn new() -> Self {
        Self {
            level_filter: Arc::new(LogLevelFilter::default()),
            name: None,
            entries: Vec::new(),
        }
    }

    pub fn with_level_filter(mut self, filter: Arc<LogLevelFilter>) -> Self {
        self.level_filter = filter;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Log a message to tracing and, if it passes the filter, to the entry list.
    pub fn log(&mut self, level: LogLevel, message: &str) {
        let name = self.name.as_deref().unwrap_or("import");
        match log_level_to_tracing(level) {
            Level::ERROR => tracing::error!(logger = %name, "{}", message),
            Level::WARN => tracing::warn!(logger = %name, "{}", message),
            Level::INFO => tracing::info!(logger = %name, "{}", message),
            _ => tracing::debug!(logger = %name, "{}", message),
        }

        if self.level_filter.should_log(level) {
            self.entries.push(LogEntry {
                timestamp: Utc::now(),
                level,
                message: message.to_string(),
            });
        }
    }

    pub fn debug(&mut self, msg: &str) {
        self.log(LogLevel::Debug, msg);
    }

    pub fn info(&mut self, msg: &str) {
        self.log(LogLevel::Info, msg);
    }

    pub fn warning(&mut self, msg: &str) {
        self.log(LogLevel::Warning, msg);
    }

    pub fn error(&mut self, msg: &str) {
        self.log(LogLevel::Error, msg);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}

impl Default for ImportLogger {
    fn default() -> Self {
        Self::new()
    }
}

/// Where the CLI sends tracing output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Off,
    Stdout,
    Stderr,
    File(String),
}

impl LogTarget {
    /// Parse the `--log` flag: `0/off`, `1/stdout`, `2/stderr`, or a file name.
    pub fn parse(value: &str) -> Self {
        match value {
            "0" | "off" => LogTarget::Off,
            "1" | "stdout" => LogTarget::Stdout,
            "2" | "stderr" => LogTarget::Stderr,
            filename => LogTarget::File(filename.to_string()),
        }
    }
}

/// Install the global tracing subscriber.
pub fn init_tracing(target: &LogTarget, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    match target {
        LogTarget::Off => {}
        LogTarget::Stdout => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogTarget::Stderr => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogTarget::File(filename) => {
            // Append mode
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_filter() {
        let filter = LogLevelFilter::new(LogLevel::Warning);

        assert!(!filter.should_log(LogLevel::Debug));
        assert!(!filter.should_log(LogLevel::Info));
        assert!(filter.should_log(LogLevel::Warning));
        assert!(filter.should_log(LogLevel::Error));
    }

    #[test]
    fn test_level_filter_update() {
        let filter = LogLevelFilter::new(LogLevel::Debug);
        assert!(filter.should_log(LogLevel::Debug));

        filter.set(LogLevel::Error);
        assert!(!filter.should_log(LogLevel::Warning));
        assert!(filter.should_log(LogLevel::Error));
        assert_eq!(filter.get(), LogLevel::Error);
    }

    #[test]
    fn test_logger_records_filtered_entries() {
        let filter = Arc::new(LogLevelFilter::new(LogLevel::Info));
        let mut logger = ImportLogger::new()
            .with_level_filter(filter)
            .with_name("test");

        logger.debug("hidden");
        logger.info("phase started");
        logger.error("write failed");

        let entries = logger.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[1].message, "write failed");
    }

    #[test]
    fn test_log_target_parse() {
        assert_eq!(LogTarget::parse("0"), LogTarget::Off);
        assert_eq!(LogTarget::parse("stdout"), LogTarget::Stdout);
        assert_eq!(LogTarget::parse("2"), LogTarget::Stderr);
        assert_eq!(
            LogTarget::parse("import.log"),
            LogTarget::File("import.log".to_string())
        );
    }

    #[test]
    fn test_logging_level_to_tracing() {
        assert_eq!(log_level_to_tracing(LogLevel::Debug), Level::DEBUG);
        assert_eq!(log_level_to_tracing(LogLevel::Warning), Level::WARN);
        assert_eq!(log_level_to_tracing(LogLevel::Error), Level::ERROR);
    }
}
