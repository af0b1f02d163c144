//! Logging sink used by the consumer and publisher.
//!
//! The adapter logs through the small [`Logger`] trait so services can route
//! entries wherever they like. [`TracingLogger`] forwards to `tracing`;
//! [`BufferLogger`] keeps entries in memory for assertions.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

/// Fire-and-forget logger. Implementations must never panic or block for long.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str, data: Value);

    fn warn(&self, message: &str, data: Value);

    fn error(&self, message: &str, data: Value);
}

/// Forwards log entries to the `tracing` crate, with `data` as a field.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str, data: Value) {
        tracing::info!(data = %data, "{}", message);
    }

    fn warn(&self, message: &str, data: Value) {
        tracing::warn!(data = %data, "{}", message);
    }

    fn error(&self, message: &str, data: Value) {
        tracing::error!(data = %data, "{}", message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Info => f.write_str("INFO"),
            Level::Warn => f.write_str("WARN"),
            Level::Error => f.write_str("ERROR"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
    pub data: Value,
}

/// A logger that records entries into a shared buffer.
#[derive(Clone, Default)]
pub struct BufferLogger {
    buffer: Arc<Mutex<Vec<LogEntry>>>,
}

impl BufferLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<LogEntry>>>) -> Self {
        Self { buffer }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries at the given level.
    pub fn at(&self, level: Level) -> Vec<LogEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.level == level)
            .collect()
    }

    fn push(&self, level: Level, message: &str, data: Value) {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(LogEntry {
                level,
                message: message.to_string(),
                data,
            });
    }
}

impl Logger for BufferLogger {
    fn info(&self, message: &str, data: Value) {
        self.push(Level::Info, message, data);
    }

    fn warn(&self, message: &str, data: Value) {
        self.push(Level::Warn, message, data);
    }

    fn error(&self, message: &str, data: Value) {
        self.push(Level::Error, message, data);
    }
}
