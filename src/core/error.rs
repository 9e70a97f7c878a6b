//! Error handling - Hierarchical errors with explicit failure classification

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use thiserror::Error;

use crate::core::error_code::ErrorCode;

pub type Result<T> = std::result::Result<T, Error>;

/// How loudly a failure must be reacted to.
///
/// Attached to every [`Error`] through [`Error::kind`], so callers never
/// need to match on concrete variants to decide alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Business-fatal. Always paged, never downgraded.
    Critical,
    /// Lost or refused connection. Retryable.
    Connectivity,
    /// Deadline exceeded. Retryable.
    Timeout,
    /// Everything else.
    Other,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Connectivity | FailureKind::Timeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Critical => "critical",
            FailureKind::Connectivity => "connectivity",
            FailureKind::Timeout => "timeout",
            FailureKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// Runtime error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Business-fatal failure
    #[error("Critical failure [{code}]: {message}")]
    Critical { code: ErrorCode, message: String },

    /// Connectivity failures (broker, data source, network)
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Deadline exceeded
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Coded operation failure
    #[error("Operation failed [{code}]: {message}")]
    Operation { code: ErrorCode, message: String },

    /// Work refused because the executor is shut down
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Task cancelled before producing a result
    #[error("Task cancelled")]
    Cancelled,

    /// Wait aborted by cancellation of the current task
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Unit of work panicked
    #[error("Task panicked: {0}")]
    Panicked(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Retry budget exhausted
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
}

impl Error {
    pub fn critical(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Critical {
            code,
            message: message.into(),
        }
    }

    pub fn operation(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Operation {
            code,
            message: message.into(),
        }
    }

    /// Classification used by the failure handler.
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Critical { .. } => FailureKind::Critical,
            Error::Connectivity(_) => FailureKind::Connectivity,
            Error::Timeout(_) => FailureKind::Timeout,
            Error::Io(e) => match e.kind() {
                ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::AddrNotAvailable
                | ErrorKind::BrokenPipe => FailureKind::Connectivity,
                ErrorKind::TimedOut => FailureKind::Timeout,
                _ => FailureKind::Other,
            },
            Error::RetriesExhausted { last, .. } => last.kind(),
            _ => FailureKind::Other,
        }
    }

    /// Attached error code, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Critical { code, .. } | Error::Operation { code, .. } => Some(*code),
            Error::Config(_) => Some(ErrorCode::Configuration),
            Error::Rejected(_) => Some(ErrorCode::ShuttingDown),
            Error::RetriesExhausted { last, .. } => last.code(),
            _ => None,
        }
    }

    /// Short variant name for structured log fields.
    pub fn type_name(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
            Error::Critical { .. } => "critical",
            Error::Connectivity(_) => "connectivity",
            Error::Timeout(_) => "timeout",
            Error::Operation { .. } => "operation",
            Error::Rejected(_) => "rejected",
            Error::Cancelled => "cancelled",
            Error::Interrupted(_) => "interrupted",
            Error::Panicked(_) => "panicked",
            Error::InvalidState(_) => "invalid_state",
            Error::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

/// Render a panic payload caught by `catch_unwind`.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
