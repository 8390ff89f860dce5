//! Error types for connection subsystem operations.
//!
//! This module defines the errors that can occur across the invitation
//! lifecycle: storage errors, authorization failures, and invariant
//! violations that signal a logic or race bug.

use thiserror::Error;

/// Error type for connection operations.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Invitation or user not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A live invitation or connection already exists for the pair.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The actor is not allowed to perform this action on the invitation.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The request is malformed (e.g. self-connection attempt).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Attempted transition out of a non-pending invitation. Indicates a
    /// logic or race bug and must never be silently ignored.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Database error from `SQLite`.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Profile directory operation failed.
    #[error("Directory error: {0}")]
    Directory(String),
}

/// Result type alias for connection operations.
pub type Result<T> = std::result::Result<T, ConnectionError>;

impl From<crate::directory::DirectoryError> for ConnectionError {
    fn from(err: crate::directory::DirectoryError) -> Self {
        Self::Directory(err.to_string())
    }
}
