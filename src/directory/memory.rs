//! In-memory profile directory for tests.
//!
//! Stands in for the hosted profile store: profiles live in a `HashMap`,
//! connection lists are plain vectors, and search combines a
//! case-insensitive name-prefix scan with an exact-email match. The two
//! criteria are concatenated without de-duplication, which is exactly what
//! the query layer's contract has to cope with.

use std::collections::HashMap;
use std::sync::Mutex;

use super::types::ProfileProjection;
use super::{DirectoryError, DirectoryResult, ProfileDirectory};

/// A stored profile with its connection-list projection.
#[derive(Debug, Clone, Default)]
struct ProfileRecord {
    full_name: String,
    headline: Option<String>,
    avatar_url: Option<String>,
    email: Option<String>,
    connections: Vec<String>,
}

impl ProfileRecord {
    fn projection(&self, user_id: &str) -> ProfileProjection {
        ProfileProjection {
            user_id: user_id.to_string(),
            full_name: self.full_name.clone(),
            headline: self.headline.clone(),
            avatar_url: self.avatar_url.clone(),
            connections_count: self.connections.len(),
        }
    }
}

/// In-memory [`ProfileDirectory`] implementation.
///
/// Intended for tests and local development only.
#[derive(Default)]
pub struct MemoryDirectory {
    records: Mutex<HashMap<String, ProfileRecord>>,
}

impl MemoryDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a profile.
    ///
    /// The connection list of an existing profile is preserved.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn put_profile(
        &self,
        user_id: &str,
        full_name: &str,
        headline: Option<&str>,
        email: Option<&str>,
    ) {
        let mut records = self.records.lock().expect("directory lock poisoned");
        let record = records.entry(user_id.to_string()).or_default();
        record.full_name = full_name.to_string();
        record.headline = headline.map(ToString::to_string);
        record.email = email.map(ToString::to_string);
    }

    /// Returns the stored connection list for a user, for assertions.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn connection_list(&self, user_id: &str) -> Vec<String> {
        let records = self.records.lock().expect("directory lock poisoned");
        records
            .get(user_id)
            .map(|r| r.connections.clone())
            .unwrap_or_default()
    }
}

impl ProfileDirectory for MemoryDirectory {
    fn get_profile(&self, user_id: &str) -> DirectoryResult<Option<ProfileProjection>> {
        let records = self
            .records
            .lock()
            .map_err(|e| DirectoryError::Lookup(e.to_string()))?;

        Ok(records.get(user_id).map(|r| r.projection(user_id)))
    }

    fn append_connection(&self, user_id: &str, other_id: &str) -> DirectoryResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| DirectoryError::Update(e.to_string()))?;

        let record = records
            .get_mut(user_id)
            .ok_or_else(|| DirectoryError::Update(format!("Unknown user: {user_id}")))?;

        if !record.connections.iter().any(|c| c == other_id) {
            record.connections.push(other_id.to_string());
        }

        Ok(())
    }

    fn remove_connection(&self, user_id: &str, other_id: &str) -> DirectoryResult<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| DirectoryError::Update(e.to_string()))?;

        let record = records
            .get_mut(user_id)
            .ok_or_else(|| DirectoryError::Update(format!("Unknown user: {user_id}")))?;

        record.connections.retain(|c| c != other_id);
        Ok(())
    }

    fn search_profiles(&self, term: &str) -> DirectoryResult<Vec<ProfileProjection>> {
        let records = self
            .records
            .lock()
            .map_err(|e| DirectoryError::Lookup(e.to_string()))?;

        let term_lower = term.to_lowercase();
        let mut results = Vec::new();

        // Name-prefix matches, then exact-email matches. A profile hitting
        // both criteria appears twice; callers de-duplicate.
        for (user_id, record) in records.iter() {
            if record.full_name.to_lowercase().starts_with(&term_lower) {
                results.push(record.projection(user_id));
            }
        }
        for (user_id, record) in records.iter() {
            if record.email.as_deref() == Some(term) {
                results.push(record.projection(user_id));
            }
        }

        results.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(results)
    }
}
