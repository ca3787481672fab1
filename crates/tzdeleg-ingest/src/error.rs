//! Error types for the ingestion pipeline.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport-level HTTP failure (connect, timeout, body read).
    ///
    /// The request URL is stripped before wrapping.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// The source answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },

    /// Transient failures persisted past the retry budget.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// The last failure seen.
        last: Box<Error>,
    },

    /// Malformed source payload.
    #[error("decode error: {0}")]
    Decode(String),

    /// Storage failure.
    #[error("database error: {0}")]
    Database(String),

    /// The caller's cancellation fired.
    #[error("operation cancelled")]
    Cancelled,

    /// An operation ran past its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// What timed out.
        operation: &'static str,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// `start()` was called on a running controller.
    #[error("ingestion already started")]
    AlreadyStarted,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Record validation error.
    #[error("validation error: {0}")]
    Validation(#[from] tzdeleg_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was aborted.
    #[error("task error: {0}")]
    Task(String),
}

impl Error {
    /// Whether the failure is worth retrying (5xx, 429, transport).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the failure means "ran out of time or was told to stop",
    /// as opposed to "something broke".
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}
