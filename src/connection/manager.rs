//! High-level connection request API.
//!
//! This module provides the [`ConnectionManager`], the state-machine engine
//! of the connection subsystem and the only component allowed to mutate
//! invitations and connection edges. It combines [`GraphStorage`] with the
//! pair-scoped lock table and keeps the profile directory's derived
//! connection-list projections in step with the edge set.
//!
//! # Concurrency Model
//!
//! Every mutation runs under the mutex for its unordered pair: acquire the
//! pair lock, re-read state, decide, write. Operations on disjoint pairs
//! never contend. Transient `SQLite` busy errors are retried a bounded
//! number of times, re-deciding from a fresh read each attempt rather than
//! blindly re-applying, since the other participant may have resolved the
//! invitation in the meantime.

use std::path::Path;
use std::sync::Arc;

use super::error::{ConnectionError, Result};
use super::locks::PairLocks;
use super::storage::GraphStorage;
use super::types::{Invitation, InvitationStatus, PairKey, SendOutcome};
use crate::directory::ProfileDirectory;

/// Maximum attempts for a mutation that hits transient `SQLite` busy
/// errors. All other errors surface immediately, unretried.
const MAX_WRITE_RETRIES: usize = 3;

/// Database file name under the data directory.
const DB_FILE: &str = "social_graph.db";

/// High-level API for connection requests.
///
/// The sole writer of invitation and edge state. Read-side projections
/// live in [`crate::query::QueryService`], which shares this manager's
/// storage.
///
/// # Example
///
/// ```ignore
/// use std::path::Path;
/// use std::sync::Arc;
/// use trellis_core::connection::ConnectionManager;
///
/// let manager = ConnectionManager::open(Path::new("/data/trellis"), directory)?;
/// let outcome = manager.send_request("u1", "u2")?;
/// ```
pub struct ConnectionManager {
    storage: Arc<GraphStorage>,
    directory: Arc<dyn ProfileDirectory>,
    locks: PairLocks,
}

impl ConnectionManager {
    /// Creates a manager with shared storage and directory handles.
    #[must_use]
    pub fn new(storage: Arc<GraphStorage>, directory: Arc<dyn ProfileDirectory>) -> Self {
        Self {
            storage,
            directory,
            locks: PairLocks::new(),
        }
    }

    /// Creates a manager backed by a database under `data_dir`.
    ///
    /// Creates the directory and database if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    pub fn open(data_dir: &Path, directory: Arc<dyn ProfileDirectory>) -> Result<Self> {
        std::fs::create_dir_all(data_dir).map_err(|e| {
            ConnectionError::Storage(format!("Failed to create data directory: {e}"))
        })?;

        let storage = Arc::new(GraphStorage::new(&data_dir.join(DB_FILE))?);
        Ok(Self::new(storage, directory))
    }

    /// Creates a manager over in-memory storage for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if initialization fails.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn in_memory(directory: Arc<dyn ProfileDirectory>) -> Result<Self> {
        Ok(Self::new(Arc::new(GraphStorage::in_memory()?), directory))
    }

    /// Shared handle to the underlying storage, for wiring the query
    /// service.
    #[must_use]
    pub fn storage(&self) -> Arc<GraphStorage> {
        Arc::clone(&self.storage)
    }

    // ==================== Mutations ====================

    /// Sends a connection request from `requester_id` to `recipient_id`.
    ///
    /// Idempotent with respect to an unchanged pair state: a repeated send
    /// returns the existing pending invitation, a send to an established
    /// connection returns [`SendOutcome::AlreadyConnected`], and a send
    /// that crosses a pending invitation in the other direction resolves
    /// the race by accepting that earlier invitation (both users wanted to
    /// connect; neither has to re-confirm).
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a self-connection attempt, or an
    /// error if the storage or directory operation fails.
    pub fn send_request(&self, requester_id: &str, recipient_id: &str) -> Result<SendOutcome> {
        if requester_id == recipient_id {
            return Err(ConnectionError::InvalidArgument(format!(
                "User {requester_id} cannot connect to themselves"
            )));
        }

        let pair = PairKey::new(requester_id, recipient_id);
        let cell = self.locks.cell(&pair)?;
        let _guard = PairLocks::acquire(&cell)?;

        Self::with_retry(|| self.resolve_send(requester_id, recipient_id))
    }

    /// Decides a send against current pair state. Runs under the pair lock.
    fn resolve_send(&self, requester_id: &str, recipient_id: &str) -> Result<SendOutcome> {
        if self.storage.has_edge(requester_id, recipient_id)? {
            return Ok(SendOutcome::AlreadyConnected);
        }

        if let Some(pending) = self.storage.get_pending_by_pair(requester_id, recipient_id)? {
            if pending.requester_id == requester_id {
                return Ok(SendOutcome::AlreadySent(pending));
            }

            // Simultaneous-invite race: the counterpart invited first. The
            // earlier invitation wins and is accepted on their behalf, so
            // the pair ends up connected instead of deadlocked with two
            // dangling requests.
            let accepted = self.storage.accept_invitation(pending.id, now())?;
            self.project_connected(&accepted.requester_id, &accepted.recipient_id)?;
            tracing::debug!(
                invitation_id = accepted.id,
                requester = %accepted.requester_id,
                recipient = %accepted.recipient_id,
                "cross-invite resolved by accepting the earlier invitation"
            );
            return Ok(SendOutcome::AlreadyReceived(accepted));
        }

        let invitation = self
            .storage
            .create_invitation(requester_id, recipient_id, now())?;
        tracing::debug!(
            invitation_id = invitation.id,
            requester = %requester_id,
            recipient = %recipient_id,
            "connection request sent"
        );
        Ok(SendOutcome::Sent(invitation))
    }

    /// Withdraws a pending invitation. Only the requester may cancel.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the invitation doesn't exist, `Unauthorized`
    /// if `actor_id` is not the requester, `InvariantViolation` if the
    /// invitation is no longer pending, or an error if the storage
    /// operation fails.
    pub fn cancel_request(&self, invitation_id: i64, actor_id: &str) -> Result<()> {
        let invitation = self.load_invitation(invitation_id)?;
        let cell = self.locks.cell(&invitation.pair())?;
        let _guard = PairLocks::acquire(&cell)?;

        Self::with_retry(|| {
            let current = self.load_invitation(invitation_id)?;
            if current.requester_id != actor_id {
                return Err(ConnectionError::Unauthorized(format!(
                    "User {actor_id} is not the requester of invitation {invitation_id}"
                )));
            }

            self.storage
                .set_status(invitation_id, InvitationStatus::Cancelled, now())
        })?;

        tracing::debug!(invitation_id, actor = %actor_id, "invitation cancelled");
        Ok(())
    }

    /// Accepts a pending invitation, establishing the connection. Only the
    /// recipient may accept.
    ///
    /// The status flip and the edge insert share one storage transaction;
    /// the directory's connection-list projections for both users are
    /// updated before the call returns.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the invitation doesn't exist, `Unauthorized`
    /// if `actor_id` is not the recipient, `InvariantViolation` if the
    /// invitation is no longer pending, or an error if the storage or
    /// directory operation fails.
    pub fn accept_request(&self, invitation_id: i64, actor_id: &str) -> Result<Invitation> {
        let invitation = self.load_invitation(invitation_id)?;
        let cell = self.locks.cell(&invitation.pair())?;
        let _guard = PairLocks::acquire(&cell)?;

        let accepted = Self::with_retry(|| {
            let current = self.load_invitation(invitation_id)?;
            if current.recipient_id != actor_id {
                return Err(ConnectionError::Unauthorized(format!(
                    "User {actor_id} is not the recipient of invitation {invitation_id}"
                )));
            }

            self.storage.accept_invitation(invitation_id, now())
        })?;

        self.project_connected(&accepted.requester_id, &accepted.recipient_id)?;
        tracing::debug!(
            invitation_id,
            requester = %accepted.requester_id,
            recipient = %accepted.recipient_id,
            "invitation accepted, connection established"
        );
        Ok(accepted)
    }

    /// Ignores a pending invitation. Only the recipient may ignore; no
    /// connection is created.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the invitation doesn't exist, `Unauthorized`
    /// if `actor_id` is not the recipient, `InvariantViolation` if the
    /// invitation is no longer pending, or an error if the storage
    /// operation fails.
    pub fn ignore_request(&self, invitation_id: i64, actor_id: &str) -> Result<()> {
        let invitation = self.load_invitation(invitation_id)?;
        let cell = self.locks.cell(&invitation.pair())?;
        let _guard = PairLocks::acquire(&cell)?;

        Self::with_retry(|| {
            let current = self.load_invitation(invitation_id)?;
            if current.recipient_id != actor_id {
                return Err(ConnectionError::Unauthorized(format!(
                    "User {actor_id} is not the recipient of invitation {invitation_id}"
                )));
            }

            self.storage
                .set_status(invitation_id, InvitationStatus::Ignored, now())
        })?;

        tracing::debug!(invitation_id, actor = %actor_id, "invitation ignored");
        Ok(())
    }

    /// Removes an established connection. Idempotent; disconnecting a pair
    /// that isn't connected is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if both ids are the same user, or an
    /// error if the storage or directory operation fails.
    pub fn disconnect(&self, x: &str, y: &str) -> Result<()> {
        if x == y {
            return Err(ConnectionError::InvalidArgument(format!(
                "User {x} cannot disconnect from themselves"
            )));
        }

        let pair = PairKey::new(x, y);
        let cell = self.locks.cell(&pair)?;
        let _guard = PairLocks::acquire(&cell)?;

        Self::with_retry(|| self.storage.remove_edge(x, y))?;
        self.project_disconnected(x, y)?;

        tracing::debug!(user_a = %x, user_b = %y, "connection removed");
        Ok(())
    }

    // ==================== Internals ====================

    /// Reads an invitation, mapping absence to `NotFound`.
    fn load_invitation(&self, invitation_id: i64) -> Result<Invitation> {
        self.storage
            .get_invitation(invitation_id)?
            .ok_or_else(|| ConnectionError::NotFound(format!("Invitation {invitation_id} not found")))
    }

    /// Mirrors a new edge into both users' directory projections.
    ///
    /// The projections are a derived cache of the edge set; a failure here
    /// is logged and surfaced without rolling back the committed edge.
    fn project_connected(&self, a: &str, b: &str) -> Result<()> {
        let result = self
            .directory
            .append_connection(a, b)
            .and_then(|()| self.directory.append_connection(b, a));

        if let Err(e) = result {
            tracing::warn!(user_a = %a, user_b = %b, error = %e,
                "failed to update directory connection projection");
            return Err(e.into());
        }
        Ok(())
    }

    /// Mirrors an edge removal into both users' directory projections.
    fn project_disconnected(&self, a: &str, b: &str) -> Result<()> {
        let result = self
            .directory
            .remove_connection(a, b)
            .and_then(|()| self.directory.remove_connection(b, a));

        if let Err(e) = result {
            tracing::warn!(user_a = %a, user_b = %b, error = %e,
                "failed to update directory connection projection");
            return Err(e.into());
        }
        Ok(())
    }

    /// Runs a mutation, retrying on transient `SQLite` busy errors.
    ///
    /// The closure re-reads state on each attempt, so the decision is made
    /// against the world as it is, not as it was.
    fn with_retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(ConnectionError::Database(e)) if is_transient(&e) && attempt < MAX_WRITE_RETRIES => {
                    tracing::debug!(attempt, "retrying after transient database error");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// Returns whether a `SQLite` error is a transient busy/locked condition.
fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if matches!(
            e.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        )
    )
}

/// Current Unix timestamp.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
