use std::time::Instant;

use crate::types::{LogEntry, LogLevel};

/// Session-scoped diagnostic buffer, flushed to the backend in batches.
/// Every entry is mirrored to the local tracing subscriber as it lands.
pub(crate) struct LogBuffer {
    entries: Vec<LogEntry>,
    epoch: Instant,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            epoch: Instant::now(),
        }
    }

    /// New session: relative timestamps restart at zero and anything a
    /// dead session never flushed is discarded.
    pub fn reset_epoch(&mut self) {
        self.epoch = Instant::now();
        self.entries.clear();
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Info, text.into());
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.push(LogLevel::Error, text.into());
    }

    fn push(&mut self, level: LogLevel, text: String) {
        match level {
            LogLevel::Info => tracing::info!("{}", text),
            LogLevel::Error => tracing::error!("{}", text),
        }
        self.entries.push(LogEntry::new(level, self.epoch.elapsed().as_secs_f64(), &text));
    }

    /// Takes everything buffered; the buffer is empty afterwards whether
    /// or not the caller manages to deliver the batch.
    pub fn drain(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
