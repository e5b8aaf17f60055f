//! Structured security and lifecycle logging
//!
//! Stages never call the `log` macros for security events directly. They go
//! through an injected [`Logger`], which scrubs sensitive context fields and
//! hands a [`LogEntry`] to a [`LogSink`]. The default sink forwards to the
//! `log` facade; tests capture entries with [`MemorySink`].

use crate::security::redact::redact_map;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "DEBUG" | "TRACE" => LogLevel::Debug,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" | "CRITICAL" | "FATAL" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Structured log entry
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    pub context: Map<String, Value>,
}

pub trait LogSink: Send + Sync + 'static {
    fn write(&self, entry: &LogEntry);
}

/// Emits entries through the `log` crate
#[derive(Debug, Default)]
pub struct FacadeSink;

impl LogSink for FacadeSink {
    fn write(&self, entry: &LogEntry) {
        let context = Value::Object(entry.context.clone());
        match entry.level {
            LogLevel::Debug => log::debug!("{} {}", entry.message, context),
            LogLevel::Info => log::info!("{} {}", entry.message, context),
            LogLevel::Warn => log::warn!("{} {}", entry.message, context),
            LogLevel::Error => log::error!("{} {}", entry.message, context),
        }
    }
}

/// Keeps entries in memory for inspection
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// First entry whose message contains `needle`
    pub fn find(&self, needle: &str) -> Option<LogEntry> {
        self.entries()
            .into_iter()
            .find(|entry| entry.message.contains(needle))
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: &LogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
    }
}

/// Redacting front-end for a [`LogSink`]
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    min_level: LogLevel,
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            min_level: LogLevel::Debug,
        }
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    pub fn log(&self, level: LogLevel, message: &str, context: Map<String, Value>) {
        if level < self.min_level {
            return;
        }

        let entry = LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            level,
            message: message.to_string(),
            context: redact_map(&context),
        };
        self.sink.write(&entry);
    }

    pub fn debug(&self, message: &str, context: Map<String, Value>) {
        self.log(LogLevel::Debug, message, context);
    }

    pub fn info(&self, message: &str, context: Map<String, Value>) {
        self.log(LogLevel::Info, message, context);
    }

    pub fn warning(&self, message: &str, context: Map<String, Value>) {
        self.log(LogLevel::Warn, message, context);
    }

    pub fn error(&self, message: &str, context: Map<String, Value>) {
        self.log(LogLevel::Error, message, context);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(FacadeSink))
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.min_level)
            .finish()
    }
}
