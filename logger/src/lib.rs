//! # Logger
//!
//! This crate implements structured logging.
//!
//! ## Philosophy
//!
//! Logging is explicit and structured, not text-based or printf-style.
//! An entry carries a level, the object it is about, a message and
//! ordered key/value fields; how it is rendered is up to the sink.

use core_types::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational messages
    Info,
    /// Warnings
    Warn,
    /// Errors
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// A structured log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Object the entry is about (if any)
    pub source: Option<ObjectId>,
    /// Log message
    pub message: String,
    /// Structured fields
    pub fields: Vec<(String, String)>,
}

impl LogEntry {
    /// Creates a new log entry
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            source: None,
            message: message.into(),
            fields: Vec::new(),
        }
    }

    /// Sets the source object
    pub fn with_source(mut self, source: ObjectId) -> Self {
        self.source = Some(source);
        self
    }

    /// Adds a field to the log entry
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    /// Looks up a field value by key
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.level)?;
        if let Some(source) = self.source {
            write!(f, " {}", source)?;
        }
        write!(f, " {}", self.message)?;
        for (key, value) in &self.fields {
            write!(f, " {}={}", key, value)?;
        }
        Ok(())
    }
}

/// Destination for log entries
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &LogEntry);
}

/// Writes one line per entry to standard error
#[derive(Debug, Default)]
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&self, entry: &LogEntry) {
        let _ = writeln!(std::io::stderr().lock(), "{}", entry);
    }
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _entry: &LogEntry) {}
}

/// Keeps the most recent entries in memory
///
/// Oldest entries are dropped once the capacity is reached.
#[derive(Debug)]
pub struct MemorySink {
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
}

impl MemorySink {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Copies out every retained entry, oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    /// Retained entries at `level`
    pub fn entries_at(&self, level: LogLevel) -> Vec<LogEntry> {
        self.lock()
            .iter()
            .filter(|e| e.level == level)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: &LogEntry) {
        let mut entries = self.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
    }
}

/// Level filter in front of a sink
#[derive(Clone)]
pub struct Logger {
    min_level: LogLevel,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(min_level: LogLevel, sink: Arc<dyn LogSink>) -> Self {
        Self { min_level, sink }
    }

    /// Logger that drops everything
    pub fn disabled() -> Self {
        Self::new(LogLevel::Error, Arc::new(NullSink))
    }

    pub fn min_level(&self) -> LogLevel {
        self.min_level
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    /// Forwards `entry` if its level passes the filter
    pub fn log(&self, entry: LogEntry) {
        if self.enabled(entry.level) {
            self.sink.write(&entry);
        }
    }

    pub fn debug(&self, entry: impl FnOnce(LogEntry) -> LogEntry, message: &str) {
        self.emit(LogLevel::Debug, message, entry);
    }

    pub fn info(&self, entry: impl FnOnce(LogEntry) -> LogEntry, message: &str) {
        self.emit(LogLevel::Info, message, entry);
    }

    pub fn warn(&self, entry: impl FnOnce(LogEntry) -> LogEntry, message: &str) {
        self.emit(LogLevel::Warn, message, entry);
    }

    pub fn error(&self, entry: impl FnOnce(LogEntry) -> LogEntry, message: &str) {
        self.emit(LogLevel::Error, message, entry);
    }

    /// Builds the entry only when it will actually be written
    fn emit(&self, level: LogLevel, message: &str, decorate: impl FnOnce(LogEntry) -> LogEntry) {
        if self.enabled(level) {
            self.sink.write(&decorate(LogEntry::new(level, message)));
        }
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.min_level)
            .finish_non_exhaustive()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::Warn, Arc::new(StderrSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::ObjectKind;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_log_level_serde() {
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"warn\"");
        let level: LogLevel = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(level, LogLevel::Debug);
    }

    #[test]
    fn test_log_entry_creation() {
        let entry = LogEntry::new(LogLevel::Info, "test message");
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.message, "test message");
        assert!(entry.source.is_none());
        assert!(entry.fields.is_empty());
    }

    #[test]
    fn test_log_entry_with_source() {
        let id = ObjectId::new(ObjectKind::Task, 1, 2);
        let entry = LogEntry::new(LogLevel::Info, "test").with_source(id);
        assert_eq!(entry.source, Some(id));
    }

    #[test]
    fn test_log_entry_with_fields() {
        let entry = LogEntry::new(LogLevel::Info, "test")
            .with_field("key1", "value1")
            .with_field("key2", 42);

        assert_eq!(entry.fields.len(), 2);
        assert_eq!(entry.field("key1"), Some("value1"));
        assert_eq!(entry.field("key2"), Some("42"));
        assert_eq!(entry.field("missing"), None);
    }

    #[test]
    fn test_log_entry_display() {
        let id = ObjectId::new(ObjectKind::Queue, 1, 0);
        let entry = LogEntry::new(LogLevel::Warn, "queue full")
            .with_source(id)
            .with_field("depth", 4);
        assert_eq!(entry.to_string(), "[WARN] queue(0#1) queue full depth=4");
    }

    #[test]
    fn test_logger_filters_by_level() {
        let sink = Arc::new(MemorySink::new());
        let logger = Logger::new(LogLevel::Warn, sink.clone());

        logger.debug(|e| e, "hidden");
        logger.info(|e| e, "hidden");
        logger.warn(|e| e.with_field("k", "v"), "shown");
        logger.error(|e| e, "shown too");

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Warn);
        assert_eq!(entries[0].field("k"), Some("v"));
        assert_eq!(sink.entries_at(LogLevel::Error).len(), 1);
    }

    #[test]
    fn test_memory_sink_is_bounded() {
        let sink = MemorySink::with_capacity(2);
        for i in 0..3 {
            sink.write(&LogEntry::new(LogLevel::Info, format!("m{}", i)));
        }
        let messages: Vec<String> = sink.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["m1", "m2"]);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_disabled_logger() {
        let logger = Logger::disabled();
        assert!(!logger.enabled(LogLevel::Warn));
        logger.error(|e| e, "goes nowhere");
    }
}
