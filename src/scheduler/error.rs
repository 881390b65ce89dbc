//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
#[derive(Debug)]
pub enum SchedulerError {
    /// Slot source could not be read
    SourceUnavailable {
        source_name: String,
        reason: String,
    },

    /// Time of day not in HH:MM form
    InvalidTime {
        value: String,
    },

    /// Slot definition rejected while loading a timetable
    InvalidSlot {
        name: String,
        reason: String,
    },

    /// Timetable file could not be parsed
    ParseError {
        path: String,
        reason: String,
    },

    /// IO error
    IoError {
        operation: String,
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceUnavailable {
                source_name,
                reason,
            } => {
                write!(f, "Schedule source '{}' unavailable: {}", source_name, reason)
            }
            Self::InvalidTime { value } => {
                write!(f, "Invalid time '{}'. Expected HH:MM", value)
            }
            Self::InvalidSlot { name, reason } => {
                write!(f, "Invalid slot '{}': {}", name, reason)
            }
            Self::ParseError { path, reason } => {
                write!(f, "Failed to parse timetable {}: {}", path, reason)
            }
            Self::IoError { operation, reason } => {
                write!(f, "IO error during '{}': {}", operation, reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl SchedulerError {
    /// Create a source unavailable error
    pub fn source_unavailable(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid time error
    pub fn invalid_time(value: impl Into<String>) -> Self {
        Self::InvalidTime {
            value: value.into(),
        }
    }

    /// Create an invalid slot error
    pub fn invalid_slot(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSlot {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an IO error with context
    pub fn io_error(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IoError {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Check if the error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. } | Self::IoError { .. })
    }
}
