//! Log entries produced during a run

use chrono::{Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Severity tag of a [`LogEntry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Debug,
    Warn,
    Error,
    PointEvent,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Warn => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
            Severity::PointEvent => write!(f, "point-event"),
        }
    }
}

/// One timestamped log record
///
/// `timestamp` is in seconds since the Unix epoch. Entries are immutable once
/// created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "severity", rename_all = "kebab-case")]
pub enum LogEntry {
    Debug {
        timestamp: f64,
        message: String,
    },
    Warn {
        timestamp: f64,
        message: String,
    },
    /// A point failed
    Error {
        timestamp: f64,
        point: usize,
        message: String,
    },
    /// A point finished
    PointEvent {
        timestamp: f64,
        point: usize,
        elapsed_secs: f64,
        message: String,
    },
}

impl LogEntry {
    pub fn debug(message: impl Into<String>) -> Self {
        LogEntry::Debug {
            timestamp: now_secs(),
            message: message.into(),
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        LogEntry::Warn {
            timestamp: now_secs(),
            message: message.into(),
        }
    }

    pub fn error(point: usize, message: impl Into<String>) -> Self {
        LogEntry::Error {
            timestamp: now_secs(),
            point,
            message: message.into(),
        }
    }

    pub fn point_event(point: usize, elapsed_secs: f64, message: impl Into<String>) -> Self {
        LogEntry::PointEvent {
            timestamp: now_secs(),
            point,
            elapsed_secs,
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            LogEntry::Debug { .. } => Severity::Debug,
            LogEntry::Warn { .. } => Severity::Warn,
            LogEntry::Error { .. } => Severity::Error,
            LogEntry::PointEvent { .. } => Severity::PointEvent,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            LogEntry::Debug { timestamp, .. }
            | LogEntry::Warn { timestamp, .. }
            | LogEntry::Error { timestamp, .. }
            | LogEntry::PointEvent { timestamp, .. } => *timestamp,
        }
    }

    /// Index of the point the entry refers to, if any
    pub fn point(&self) -> Option<usize> {
        match self {
            LogEntry::Error { point, .. } | LogEntry::PointEvent { point, .. } => Some(*point),
            _ => None,
        }
    }

    /// Entry timestamp as local `%Y-%m-%d %H:%M:%S`
    pub fn time_str(&self) -> String {
        format_timestamp(self.timestamp())
    }

    /// Rendered text body, without timestamp
    pub fn text(&self) -> String {
        match self {
            LogEntry::Debug { message, .. } | LogEntry::Warn { message, .. } => message.clone(),
            LogEntry::Error { point, message, .. } => {
                format!("Point {} encountered an error ({})", point, message)
            }
            LogEntry::PointEvent { message, .. } => message.clone(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.time_str(), self.text())
    }
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Format epoch seconds as local time
pub fn format_timestamp(timestamp: f64) -> String {
    let secs = timestamp.trunc() as i64;
    let nanos = (timestamp.fract() * 1e9) as u32;
    match Local.timestamp_opt(secs, nanos).earliest() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => format!("{:.3}", timestamp),
    }
}
