//! Unified error handling for the onair crate
//!
//! Scheduler, selector and cache keep their own error enums; [`Error`]
//! wraps them together with encoder, database and I/O failures so the
//! run command can classify whatever the engine returns.
//!
//! - [`OnAirErrorTrait`] - recoverability and category of an error
//! - [`ErrorCategory`] - coarse class used in logs
//! - [`Error`] - the crate-wide error
//!
//! # Handling policy
//!
//! Recoverable errors are retried at the next natural iteration of the
//! playout loop or the uploader tick. Non-recoverable errors are only
//! allowed to abort the process during startup.

use std::io;
use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::cache::CacheError;
pub use crate::scheduler::error::SchedulerError;
pub use crate::selector::SelectorError;

/// Common trait for all onair error types
pub trait OnAirErrorTrait: std::error::Error {
    /// Check if this error is recoverable (can be retried)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Object store transfer errors
    Network,
    /// Database and local disk errors
    Storage,
    /// Track selection errors (exhausted candidates)
    Selection,
    /// Encoder subprocess errors
    Encoder,
    /// Configuration and validation errors
    Config,
    /// Schedule resolution errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Short label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Selection => "selection",
            Self::Encoder => "encoder",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the onair crate
#[derive(Error, Debug)]
pub enum Error {
    /// Schedule resolution errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Track selection errors
    #[error("Selector error: {0}")]
    Selector(#[from] SelectorError),

    /// Track cache errors
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Encoder subprocess errors
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}")]
    Other {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl OnAirErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Selector(e) => e.is_recoverable(),
            Self::Cache(e) => e.is_recoverable(),
            Self::Encoder(_) => true, // the encoder is respawned on the next run
            Self::Database(_) => true, // retried on the next loop iteration
            Self::Io(_) => true,
            Self::Json(_) => false,
            Self::Config(_) => false,
            Self::Other { .. } => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Selector(e) => match e {
                SelectorError::Storage(_) => ErrorCategory::Storage,
                _ => ErrorCategory::Selection,
            },
            Self::Cache(e) => match e {
                CacheError::Download { .. } | CacheError::NotFound { .. } => {
                    ErrorCategory::Network
                }
                CacheError::Io { .. } => ErrorCategory::Storage,
            },
            Self::Encoder(_) => ErrorCategory::Encoder,
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) => ErrorCategory::Other,
            Self::Config(_) => ErrorCategory::Config,
            Self::Other { .. } => ErrorCategory::Other,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create a generic error with context
    pub fn other(context: impl Into<String>) -> Self {
        Self::Other {
            context: context.into(),
            source: None,
        }
    }

    /// Create a generic error with context and source
    pub fn with_source(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Other {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

// Conversion from anyhow::Error
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other {
            context: format!("{err:#}"),
            source: None,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
