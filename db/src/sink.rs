//! Diagnostics sink.
//!
//! Loaders report through an injected [`LogSink`] rather than a global
//! logger. [`LogForwarder`] hands records to the `log` facade;
//! [`MemorySink`] keeps them for inspection.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use spin::Mutex;

pub use log::Level;

/// Destination for loader diagnostics.
pub trait LogSink {
    fn write(&mut self, level: Level, message: &str);
}

/// Format `args` and write it to `sink`.
pub fn emit(sink: &mut dyn LogSink, level: Level, args: fmt::Arguments<'_>) {
    match args.as_str() {
        Some(message) => sink.write(level, message),
        None => sink.write(level, &alloc::fmt::format(args)),
    }
}

/// Sink that forwards to the `log` crate under a fixed target.
#[derive(Debug, Clone, Copy)]
pub struct LogForwarder {
    target: &'static str,
}

impl LogForwarder {
    pub const fn new(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for LogForwarder {
    fn default() -> Self {
        Self::new("rekon")
    }
}

impl LogSink for LogForwarder {
    fn write(&mut self, level: Level, message: &str) {
        log::log!(target: self.target, level, "{}", message);
    }
}

/// A captured diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub level: Level,
    pub message: String,
}

/// Sink that stores every record. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records written so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }

    /// Check if any record at `level` contains `needle`
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    }
}

impl LogSink for MemorySink {
    fn write(&mut self, level: Level, message: &str) {
        self.records.lock().push(LogRecord {
            level,
            message: message.to_string(),
        });
    }
}
