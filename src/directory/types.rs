//! Value types exchanged with the profile directory.

use serde::{Deserialize, Serialize};

/// Minimal profile projection returned by the directory.
///
/// Only what list rows and search results need; full profiles stay in the
/// external store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileProjection {
    /// Opaque user identifier.
    pub user_id: String,
    /// Display name.
    pub full_name: String,
    /// Headline shown under the name, if set.
    pub headline: Option<String>,
    /// Avatar image URL, if set.
    pub avatar_url: Option<String>,
    /// Number of established connections, computed from the connection
    /// list length by the directory.
    pub connections_count: usize,
}
