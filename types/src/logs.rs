use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LogLevel {
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "ERROR")]
    Error,
}

/// One line of the session log buffer, flushed to the backend in batches.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    time: DateTime<Utc>,

    /// Seconds since the session started.
    relative_time: f64,

    level: LogLevel,

    text: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, relative_time: f64, text: &str) -> Self {
        Self {
            time: Utc::now(),
            relative_time,
            level,
            text: text.to_string(),
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn relative_time(&self) -> f64 {
        self.relative_time
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}
