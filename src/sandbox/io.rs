//! Console capture for sandboxed scripts.
//!
//! `console.*` calls inside a snippet never reach the host's stdout or its
//! tracing subscriber. They are recorded as [`LogEntry`] values in bounded
//! buffers: one per execution and one per sandbox instance.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Maximum entries retained per sandbox instance and per execution.
pub const MAX_LOG_ENTRIES: usize = 100;

/// Maximum characters kept from a single console message.
pub const MAX_LOG_MESSAGE_CHARS: usize = 1_000;

/// Severity of a console entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    /// Level for a `console` method name.
    pub fn from_method(name: &str) -> Option<Self> {
        match name {
            "log" => Some(LogLevel::Log),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            "debug" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

/// A single captured console call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    /// Console method that produced the entry.
    pub level: LogLevel,
    /// Space-joined arguments, truncated to [`MAX_LOG_MESSAGE_CHARS`].
    pub message: String,
    /// When the call happened.
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    /// Create an entry stamped with the current time.
    pub fn new(level: LogLevel, message: &str) -> Self {
        let message = match message.char_indices().nth(MAX_LOG_MESSAGE_CHARS) {
            Some((cut, _)) => message[..cut].to_string(),
            None => message.to_string(),
        };
        Self {
            level,
            message,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded FIFO of log entries that drops the oldest entry when full.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    dropped: usize,
}

impl LogBuffer {
    /// Create a buffer holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Append an entry, evicting the oldest one if the buffer is full.
    pub fn push(&mut self, entry: LogEntry) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(entry);
    }

    /// Append every entry of `entries` in order.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = LogEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    /// Copy of the retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Take the retained entries, leaving the buffer empty.
    pub fn drain(&mut self) -> Vec<LogEntry> {
        self.entries.drain(..).collect()
    }

    /// Remove all entries and reset the drop counter.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.dropped = 0;
    }

    /// Number of entries evicted since the last clear.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Get the number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(MAX_LOG_ENTRIES)
    }
}
