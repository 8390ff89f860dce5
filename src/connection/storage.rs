//! `SQLite` storage for the connection subsystem.
//!
//! This module provides persistent storage for invitations and connection
//! edges. Both live in one database so the accept transition (status flip
//! plus edge insert) can run inside a single transaction.
//!
//! # Invariants
//!
//! - At most one `pending` invitation per unordered pair, in either
//!   direction, enforced by a partial unique index over the sorted pair.
//! - Each connection edge is stored once, endpoints in sorted order.
//! - A pending invitation and an edge for the same pair never coexist;
//!   the resolver enforces this and [`GraphStorage::verify_pair_exclusive`]
//!   checks it directly against SQL.

// SQLite operations need to hold the lock for the duration of the operation.
// Dropping the guard earlier would require restructuring all methods.
#![allow(clippy::significant_drop_tightening)]

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection as DbConnection, OptionalExtension, Row};

use super::error::{ConnectionError, Result};
use super::types::{Connection, Invitation, InvitationStatus, PairKey};

/// `SQLite`-based storage for invitations and connection edges.
///
/// Thread-safe wrapper around a `SQLite` connection. Mutations that must be
/// atomic run inside a transaction; callers serialize writes per pair via
/// the resolver's pair locks.
pub struct GraphStorage {
    conn: Mutex<DbConnection>,
}

impl GraphStorage {
    /// Creates a new storage instance at the given path.
    ///
    /// Creates the database file and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or initialized.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = DbConnection::open(path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Creates an in-memory storage instance for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn in_memory() -> Result<Self> {
        let conn = DbConnection::open_in_memory()?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Initializes the database schema.
    fn initialize_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        conn.execute_batch(
            r"
            -- Invitation lifecycle, one row per send, terminal rows kept as history
            CREATE TABLE IF NOT EXISTS invitations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                requester_id TEXT NOT NULL,
                recipient_id TEXT NOT NULL,
                pair_lo TEXT NOT NULL,
                pair_hi TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at INTEGER NOT NULL,
                resolved_at INTEGER
            );

            -- At most one live invitation per unordered pair
            CREATE UNIQUE INDEX IF NOT EXISTS idx_invitations_pending_pair
                ON invitations (pair_lo, pair_hi) WHERE status = 'pending';

            CREATE INDEX IF NOT EXISTS idx_invitations_pending_recipient
                ON invitations (recipient_id) WHERE status = 'pending';

            CREATE INDEX IF NOT EXISTS idx_invitations_pending_requester
                ON invitations (requester_id) WHERE status = 'pending';

            -- Established connections, one row per pair, endpoints sorted
            CREATE TABLE IF NOT EXISTS connection_edges (
                pair_lo TEXT NOT NULL,
                pair_hi TEXT NOT NULL,
                established_at INTEGER NOT NULL,
                PRIMARY KEY (pair_lo, pair_hi)
            );
            ",
        )?;

        Ok(())
    }

    // ==================== Invitation Operations ====================

    /// Creates a new pending invitation.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a pending invitation already exists for the
    /// pair in either direction, or if the pair is already connected.
    /// Returns an error if the database operation fails.
    pub fn create_invitation(
        &self,
        requester_id: &str,
        recipient_id: &str,
        created_at: i64,
    ) -> Result<Invitation> {
        let pair = PairKey::new(requester_id, recipient_id);
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        let connected: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM connection_edges WHERE pair_lo = ?1 AND pair_hi = ?2)",
            params![pair.lo(), pair.hi()],
            |row| row.get(0),
        )?;
        if connected {
            return Err(ConnectionError::Conflict(format!(
                "Users {requester_id} and {recipient_id} are already connected"
            )));
        }

        let result = conn.execute(
            r"
            INSERT INTO invitations (requester_id, recipient_id, pair_lo, pair_hi, status, created_at)
            VALUES (?1, ?2, ?3, ?4, 'pending', ?5)
            ",
            params![requester_id, recipient_id, pair.lo(), pair.hi(), created_at],
        );

        match result {
            Ok(_) => Ok(Invitation {
                id: conn.last_insert_rowid(),
                requester_id: requester_id.to_string(),
                recipient_id: recipient_id.to_string(),
                status: InvitationStatus::Pending,
                created_at,
                resolved_at: None,
            }),
            // The partial unique index rejects a second live invitation for
            // the pair regardless of direction.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(ConnectionError::Conflict(format!(
                    "A pending invitation already exists between {requester_id} and {recipient_id}"
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Retrieves an invitation by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_invitation(&self, id: i64) -> Result<Option<Invitation>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        let result = conn
            .query_row(
                r"
                SELECT id, requester_id, recipient_id, status, created_at, resolved_at
                FROM invitations
                WHERE id = ?1
                ",
                params![id],
                map_invitation_row,
            )
            .optional()?;

        result.map(parse_invitation).transpose()
    }

    /// Retrieves the pending invitation for an unordered pair, if any.
    ///
    /// Lookup is independent of direction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_pending_by_pair(&self, x: &str, y: &str) -> Result<Option<Invitation>> {
        let pair = PairKey::new(x, y);
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        let result = conn
            .query_row(
                r"
                SELECT id, requester_id, recipient_id, status, created_at, resolved_at
                FROM invitations
                WHERE pair_lo = ?1 AND pair_hi = ?2 AND status = 'pending'
                ",
                params![pair.lo(), pair.hi()],
                map_invitation_row,
            )
            .optional()?;

        result.map(parse_invitation).transpose()
    }

    /// Retrieves all pending invitations addressed to a recipient, newest
    /// first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_pending_for_recipient(&self, user_id: &str) -> Result<Vec<Invitation>> {
        self.list_pending("recipient_id", user_id)
    }

    /// Retrieves all pending invitations sent by a requester, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_pending_sent(&self, user_id: &str) -> Result<Vec<Invitation>> {
        self.list_pending("requester_id", user_id)
    }

    fn list_pending(&self, column: &str, user_id: &str) -> Result<Vec<Invitation>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        // `column` is one of two literals chosen above, never caller input.
        let mut stmt = conn.prepare(&format!(
            r"
            SELECT id, requester_id, recipient_id, status, created_at, resolved_at
            FROM invitations
            WHERE {column} = ?1 AND status = 'pending'
            ORDER BY created_at DESC, id DESC
            "
        ))?;

        let rows = stmt
            .query_map(params![user_id], map_invitation_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(parse_invitation).collect()
    }

    /// Transitions a pending invitation to a terminal status.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the invitation doesn't exist,
    /// `InvariantViolation` if its current status is not `pending`, or an
    /// error if the database operation fails.
    pub fn set_status(&self, id: i64, status: InvitationStatus, resolved_at: i64) -> Result<()> {
        if status == InvitationStatus::Pending {
            return Err(ConnectionError::InvariantViolation(
                "Cannot transition an invitation back to pending".to_string(),
            ));
        }

        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        Self::transition_invitation(&conn, id, status, resolved_at)?;
        Ok(())
    }

    /// Accepts a pending invitation and establishes the connection edge in
    /// one transaction.
    ///
    /// The edge insert is idempotent, so a pre-existing edge (from a race
    /// already resolved elsewhere) does not fail the accept.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the invitation doesn't exist,
    /// `InvariantViolation` if its current status is not `pending`, or an
    /// error if the database operation fails.
    pub fn accept_invitation(&self, id: i64, resolved_at: i64) -> Result<Invitation> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        let tx = conn.transaction()?;

        let invitation = Self::transition_invitation(&tx, id, InvitationStatus::Accepted, resolved_at)?;

        let pair = invitation.pair();
        tx.execute(
            r"
            INSERT INTO connection_edges (pair_lo, pair_hi, established_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(pair_lo, pair_hi) DO NOTHING
            ",
            params![pair.lo(), pair.hi(), resolved_at],
        )?;

        tx.commit()?;
        Ok(invitation)
    }

    /// Flips a pending invitation to `status` and returns the updated row.
    fn transition_invitation(
        conn: &DbConnection,
        id: i64,
        status: InvitationStatus,
        resolved_at: i64,
    ) -> Result<Invitation> {
        let rows = conn.execute(
            r"
            UPDATE invitations
            SET status = ?1, resolved_at = ?2
            WHERE id = ?3 AND status = 'pending'
            ",
            params![status.as_str(), resolved_at, id],
        )?;

        if rows == 0 {
            // Distinguish a missing invitation from one already resolved.
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM invitations WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;

            return match current {
                None => Err(ConnectionError::NotFound(format!("Invitation {id} not found"))),
                Some(s) => Err(ConnectionError::InvariantViolation(format!(
                    "Invitation {id} is not pending (status: {s})"
                ))),
            };
        }

        let row = conn.query_row(
            r"
            SELECT id, requester_id, recipient_id, status, created_at, resolved_at
            FROM invitations
            WHERE id = ?1
            ",
            params![id],
            map_invitation_row,
        )?;

        parse_invitation(row)
    }

    // ==================== Edge Operations ====================

    /// Adds a connection edge. Idempotent; a no-op if the edge is already
    /// present.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn add_edge(&self, x: &str, y: &str, established_at: i64) -> Result<()> {
        let pair = PairKey::new(x, y);
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        conn.execute(
            r"
            INSERT INTO connection_edges (pair_lo, pair_hi, established_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(pair_lo, pair_hi) DO NOTHING
            ",
            params![pair.lo(), pair.hi(), established_at],
        )?;

        Ok(())
    }

    /// Removes a connection edge. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn remove_edge(&self, x: &str, y: &str) -> Result<()> {
        let pair = PairKey::new(x, y);
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        conn.execute(
            "DELETE FROM connection_edges WHERE pair_lo = ?1 AND pair_hi = ?2",
            params![pair.lo(), pair.hi()],
        )?;

        Ok(())
    }

    /// Returns whether a connection edge exists for the pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn has_edge(&self, x: &str, y: &str) -> Result<bool> {
        Ok(self.connection_between(x, y)?.is_some())
    }

    /// Retrieves the connection record for a pair, if the pair is connected.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn connection_between(&self, x: &str, y: &str) -> Result<Option<Connection>> {
        let pair = PairKey::new(x, y);
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        let result = conn
            .query_row(
                r"
                SELECT pair_lo, pair_hi, established_at
                FROM connection_edges
                WHERE pair_lo = ?1 AND pair_hi = ?2
                ",
                params![pair.lo(), pair.hi()],
                |row| {
                    Ok(Connection {
                        user_lo: row.get(0)?,
                        user_hi: row.get(1)?,
                        established_at: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(result)
    }

    /// Returns the set of users connected to `user_id`, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn neighbors(&self, user_id: &str) -> Result<Vec<String>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        let mut stmt = conn.prepare(
            r"
            SELECT pair_hi FROM connection_edges WHERE pair_lo = ?1
            UNION
            SELECT pair_lo FROM connection_edges WHERE pair_hi = ?1
            ORDER BY 1
            ",
        )?;

        let neighbors = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(neighbors)
    }

    /// Returns the number of connections `user_id` has.
    ///
    /// Always equal to `neighbors(user_id).len()`; the equality is checked
    /// by the property tests rather than assumed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn degree(&self, user_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM connection_edges WHERE pair_lo = ?1 OR pair_hi = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        usize::try_from(count)
            .map_err(|e| ConnectionError::Storage(format!("Invalid degree count: {e}")))
    }

    // ==================== Consistency Checks ====================

    /// Verifies that a pending invitation and a connection edge do not
    /// coexist for the pair.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if both exist, or an error if the
    /// database operation fails.
    pub fn verify_pair_exclusive(&self, x: &str, y: &str) -> Result<()> {
        let pair = PairKey::new(x, y);
        let conn = self
            .conn
            .lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire database lock: {e}")))?;

        let both: bool = conn.query_row(
            r"
            SELECT EXISTS(
                SELECT 1 FROM connection_edges WHERE pair_lo = ?1 AND pair_hi = ?2
            ) AND EXISTS(
                SELECT 1 FROM invitations
                WHERE pair_lo = ?1 AND pair_hi = ?2 AND status = 'pending'
            )
            ",
            params![pair.lo(), pair.hi()],
            |row| row.get(0),
        )?;

        if both {
            return Err(ConnectionError::InvariantViolation(format!(
                "Pair {{{}, {}}} has both a pending invitation and a connection",
                pair.lo(),
                pair.hi()
            )));
        }

        Ok(())
    }
}

/// Extracts the raw invitation columns from a row.
#[allow(clippy::type_complexity)]
fn map_invitation_row(
    row: &Row<'_>,
) -> std::result::Result<(i64, String, String, String, i64, Option<i64>), rusqlite::Error> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

/// Builds an [`Invitation`] from raw columns, validating the status string.
fn parse_invitation(
    (id, requester_id, recipient_id, status_str, created_at, resolved_at): (
        i64,
        String,
        String,
        String,
        i64,
        Option<i64>,
    ),
) -> Result<Invitation> {
    let status = InvitationStatus::parse(&status_str)
        .ok_or_else(|| ConnectionError::Storage(format!("Invalid status: {status_str}")))?;

    Ok(Invitation {
        id,
        requester_id,
        recipient_id,
        status,
        created_at,
        resolved_at,
    })
}
