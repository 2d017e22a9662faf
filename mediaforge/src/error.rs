//! Application-wide error types.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of an external engine invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("media engine is not installed or not executable")]
    EngineMissing,

    #[error("media engine exited with code {code}: {message}")]
    NonZeroExit { code: i32, message: String },

    #[error("media engine timed out after {}s", .after.as_secs())]
    TimedOut { after: Duration },
}

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("missing API key")]
    Unauthorized,

    #[error("invalid API key")]
    Forbidden,

    #[error("rate limit exceeded, retry in {retry_after}s")]
    QuotaExceeded { retry_after: u64 },

    #[error("{0} not found or expired")]
    NotFound(String),

    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} ({path}): {source}", path = .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// IO error with operation and path context.
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// The offending field for validation failures.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}
