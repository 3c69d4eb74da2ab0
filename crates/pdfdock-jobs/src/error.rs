use crate::job::{JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors surfaced to callers of the store, backends and boundary service.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Job storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Job {job_id} is not ready (status: {status})")]
    NotReady { job_id: JobId, status: JobStatus },

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job {job_id} could not be dispatched: {reason}")]
    DispatchFailed { job_id: JobId, reason: String },
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Machine-readable reason a job ended in the `error` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    Validation,
    UnsupportedOperation,
    DependencyUnavailable,
    ExecutionFailure,
    DispatchFailed,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::UnsupportedOperation => "UnsupportedOperation",
            Self::DependencyUnavailable => "DependencyUnavailable",
            Self::ExecutionFailure => "ExecutionFailure",
            Self::DispatchFailed => "DispatchFailed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure returned by a unit of work or by operation resolution.
///
/// The dispatcher stores `kind` next to the rendered message so clients can
/// branch on the reason without parsing text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn unsupported(operation: &str) -> Self {
        Self::new(
            FailureKind::UnsupportedOperation,
            format!("operation `{}` is not registered", operation),
        )
    }

    pub fn dependency(tool: impl Into<String>) -> Self {
        Self::new(FailureKind::DependencyUnavailable, tool)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ExecutionFailure, message)
    }
}

impl From<std::io::Error> for TaskFailure {
    fn from(err: std::io::Error) -> Self {
        Self::execution(format!("I/O error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_names_kind() {
        let failure = TaskFailure::unsupported("does-not-exist");
        assert_eq!(failure.kind, FailureKind::UnsupportedOperation);
        assert_eq!(
            failure.to_string(),
            "UnsupportedOperation: operation `does-not-exist` is not registered"
        );
    }

    #[test]
    fn test_io_error_is_execution_failure() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let failure = TaskFailure::from(err);
        assert_eq!(failure.kind, FailureKind::ExecutionFailure);
        assert!(failure.message.contains("disk full"));
    }
}
