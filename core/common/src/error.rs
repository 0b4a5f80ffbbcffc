//! Common error types for Pearl.

use std::time::Duration;

use thiserror::Error;

/// Top-level error type for Pearl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input such as a vault link or drive key.
    #[error("{0}")]
    Validation(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage is held by another process.
    #[error("Storage locked: {0}")]
    Locked(String),

    /// A bounded wait elapsed.
    #[error("{label} timed out after {ms}ms", ms = .after.as_millis())]
    Timeout { label: String, after: Duration },

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Drive could not be created or opened.
    #[error("Drive error: {0}")]
    Drive(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Build a timeout error for the named wait.
    pub fn timeout(label: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            label: label.into(),
            after,
        }
    }

    /// True for missing files, including `io::ErrorKind::NotFound`.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, Error::Locked(_))
    }

    /// Errors that callers degrade to an offline or best-effort result
    /// instead of surfacing.
    pub fn is_recoverable(&self) -> bool {
        self.is_locked() || self.is_timeout()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
