//! Unified error handling for the email-scheduler crate
//!
//! Domain errors stay in their modules ([`SchedulerError`]); this module
//! wraps them together with storage, I/O and parsing failures into a single
//! [`Error`] for code that crosses module boundaries.
//!
//! # Architecture
//!
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping domain and library errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use email_scheduler::error::{Error, ErrorCategory};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         tracing::warn!(category = ?err.category(), "Continuing after: {err}");
//!     } else {
//!         eprintln!("Fatal error: {err}");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

pub use crate::scheduler::error::SchedulerError;

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Contact or campaign data that cannot be scheduled
    Data,
    /// Storage and I/O errors
    Storage,
    /// Serialization and parsing errors
    Parsing,
    /// Configuration and validation errors
    Config,
    /// Scheduling pipeline errors
    Scheduler,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Storage => "storage",
            Self::Parsing => "parsing",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
            Self::Other => "other",
        }
    }
}

/// Unified error type for the email-scheduler crate
#[derive(Error, Debug)]
pub enum Error {
    /// Scheduling errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Anything else, flattened from an `anyhow` chain
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if the operation may succeed when retried or skipped
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Database(_) => false,
            Self::Io(_) => true, // I/O errors are often transient
            Self::Json(_) | Self::Toml(_) => false,
            Self::Other(_) => false,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Scheduler(e) => match e {
                SchedulerError::InvalidContactData { .. } => ErrorCategory::Data,
                SchedulerError::DatabaseError { .. } => ErrorCategory::Storage,
                SchedulerError::ConfigurationError { .. } => ErrorCategory::Config,
                SchedulerError::LoadBalancingError { .. } | SchedulerError::TaskFailed { .. } => {
                    ErrorCategory::Scheduler
                }
            },
            Self::Database(_) | Self::Io(_) => ErrorCategory::Storage,
            Self::Json(_) | Self::Toml(_) => ErrorCategory::Parsing,
            Self::Other(_) => ErrorCategory::Other,
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
        Self::Other(format!("{err:#}"))
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category() {
        let err: Error = SchedulerError::invalid_contact(7, "missing email").into();
        assert_eq!(err.category(), ErrorCategory::Data);

        let err: Error = SchedulerError::load_balancing("lost schedules").into();
        assert_eq!(err.category(), ErrorCategory::Scheduler);

        let err = Error::Database(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(err.category(), ErrorCategory::Storage);
    }

    #[test]
    fn test_is_recoverable() {
        let err: Error = SchedulerError::database("persist_schedules", "locked").into();
        assert!(err.is_recoverable());

        let err: Error = SchedulerError::configuration("daily_send_percentage_cap", "zero").into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_toml_error_conversion() {
        let parsed: std::result::Result<toml::Value, _> = toml::from_str("not = [valid");
        let err: Error = parsed.unwrap_err().into();
        assert_eq!(err.category(), ErrorCategory::Parsing);
    }

    #[test]
    fn test_config_category() {
        let err: Error = SchedulerError::configuration("batch_size", "zero").into();
        assert_eq!(err.category(), ErrorCategory::Config);
        assert_eq!(err.category().as_str(), "config");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_anyhow_conversion() {
        let err: Error = anyhow::anyhow!("gone").context("reading contacts").into();
        assert_eq!(err.category(), ErrorCategory::Other);
        assert_eq!(err.to_string(), "reading contacts: gone");
    }
}
