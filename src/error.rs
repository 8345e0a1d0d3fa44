//! Error types for reftable
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using ReftableError
pub type Result<T> = std::result::Result<T, ReftableError>;

/// Unified error type for reftable operations
#[derive(Debug, Error)]
pub enum ReftableError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Format Errors
    // -------------------------------------------------------------------------
    /// Malformed or truncated table data. Never retried.
    #[error("format error: {0}")]
    Format(String),

    // -------------------------------------------------------------------------
    // Stack Errors
    // -------------------------------------------------------------------------
    /// Another writer holds the lock, or the in-memory stack is stale.
    /// The stack has been reloaded, so the transaction may be retried.
    #[error("lock failure")]
    LockFailure,

    /// A table named in the manifest is missing after the reload retry
    /// budget was exhausted.
    #[error("not found: {0}")]
    NotFound(String),

    // -------------------------------------------------------------------------
    // API Errors
    // -------------------------------------------------------------------------
    /// The writer was used incorrectly (out-of-order keys, update index
    /// outside the configured limits, refs after logs).
    #[error("API misuse: {0}")]
    Api(String),
}

impl ReftableError {
    /// Shorthand for building a format error
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        ReftableError::Format(msg.into())
    }

    /// True for errors caused by a file that does not exist
    pub(crate) fn is_not_found(&self) -> bool {
        match self {
            ReftableError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            ReftableError::NotFound(_) => true,
            _ => false,
        }
    }
}
