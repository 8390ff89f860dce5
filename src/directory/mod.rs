//! Profile directory seam.
//!
//! Profile storage, search ranking, and identity live outside this crate.
//! The connection core consumes them through the narrow [`ProfileDirectory`]
//! trait: a read of a minimal profile projection, two idempotent mutators
//! for the per-user connection-list projection, and a search primitive.
//!
//! # Architecture
//!
//! ```text
//! ConnectionManager / QueryService
//!     └── dyn ProfileDirectory (injected)
//!             └── hosted profile store (external)
//! ```
//!
//! The per-user connection lists kept by the directory are a derived,
//! cache-like projection of the authoritative edge set; `connections_count`
//! is always computed from the list length, never stored on its own.

mod types;

#[cfg(any(test, feature = "test-utils"))]
mod memory;

use thiserror::Error;

pub use types::ProfileProjection;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryDirectory;

/// Error type for profile directory operations.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// Profile lookup failed.
    #[error("Profile lookup failed: {0}")]
    Lookup(String),

    /// Projection update failed.
    #[error("Profile update failed: {0}")]
    Update(String),
}

/// Result type alias for directory operations.
pub type DirectoryResult<T> = std::result::Result<T, DirectoryError>;

/// External profile store, consumed by the connection core.
///
/// Implementations must make `append_connection` and `remove_connection`
/// idempotent: repeating a call with unchanged preconditions leaves the
/// projection unchanged.
pub trait ProfileDirectory: Send + Sync {
    /// Returns the minimal profile projection for a user, or `None` if the
    /// user is unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    fn get_profile(&self, user_id: &str) -> DirectoryResult<Option<ProfileProjection>>;

    /// Records `other_id` in `user_id`'s connection-list projection.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn append_connection(&self, user_id: &str, other_id: &str) -> DirectoryResult<()>;

    /// Removes `other_id` from `user_id`'s connection-list projection.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    fn remove_connection(&self, user_id: &str, other_id: &str) -> DirectoryResult<()>;

    /// Returns profiles matching a search term.
    ///
    /// Implementations may combine several match criteria (name prefix,
    /// exact email, ...) and may return the same profile more than once
    /// across criteria; de-duplication is the query layer's job.
    ///
    /// # Errors
    ///
    /// Returns an error if the search fails.
    fn search_profiles(&self, term: &str) -> DirectoryResult<Vec<ProfileProjection>>;
}
