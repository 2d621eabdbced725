//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
///
/// Per-item errors (`InvalidContactData`, `DatabaseError`, `TaskFailed`) are
/// collected into the run summary. `LoadBalancingError` and
/// `ConfigurationError` abort the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Contact failed eligibility validation and was left out of scheduling
    InvalidContactData {
        contact_id: i64,
        reason: String,
    },

    /// Storage call failed
    DatabaseError {
        operation: String,
        message: String,
    },

    /// Smoothing or capping pipeline produced an inconsistent result
    LoadBalancingError {
        message: String,
    },

    /// Invalid configuration detected before a run
    ConfigurationError {
        field: String,
        message: String,
    },

    /// A worker task panicked or was cancelled
    TaskFailed {
        scope: String,
        message: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidContactData { contact_id, reason } => {
                write!(f, "Invalid contact data for contact {}: {}", contact_id, reason)
            }
            Self::DatabaseError { operation, message } => {
                write!(f, "Database error during '{}': {}", operation, message)
            }
            Self::LoadBalancingError { message } => {
                write!(f, "Load balancing failed: {}", message)
            }
            Self::ConfigurationError { field, message } => {
                write!(f, "Configuration error in '{}': {}", field, message)
            }
            Self::TaskFailed { scope, message } => {
                write!(f, "Task failed in {}: {}", scope, message)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl SchedulerError {
    /// Create an invalid contact error
    pub fn invalid_contact(contact_id: i64, reason: impl Into<String>) -> Self {
        Self::InvalidContactData {
            contact_id,
            reason: reason.into(),
        }
    }

    /// Create a database error with the failing operation
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DatabaseError {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a load balancing error
    pub fn load_balancing(message: impl Into<String>) -> Self {
        Self::LoadBalancingError {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a task failure error
    pub fn task_failed(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TaskFailed {
            scope: scope.into(),
            message: message.into(),
        }
    }

    /// Short label used for metrics and summaries
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidContactData { .. } => "invalid_contact",
            Self::DatabaseError { .. } => "database",
            Self::LoadBalancingError { .. } => "load_balancing",
            Self::ConfigurationError { .. } => "configuration",
            Self::TaskFailed { .. } => "task_failed",
        }
    }

    /// Check if the run can continue after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidContactData { .. } | Self::DatabaseError { .. } | Self::TaskFailed { .. }
        )
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        Self::DatabaseError {
            operation: "unknown".to_string(),
            message: format!("{err:#}"),
        }
    }
}
