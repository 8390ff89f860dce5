//! Pair-scoped mutual exclusion for graph mutations.
//!
//! All mutating operations for a given unordered pair of users must be
//! serialized against each other, while operations on disjoint pairs
//! proceed independently. [`PairLocks`] provides that: a table of mutexes
//! keyed by the sorted pair, handed out on demand.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::error::{ConnectionError, Result};
use super::types::PairKey;

/// Table of per-pair mutexes.
///
/// Entries are created lazily on first use and retained for the lifetime
/// of the table, so a pair always maps to the same mutex. The table lock
/// is held only long enough to fetch or insert the entry; the per-pair
/// guard is what callers hold across their read-decide-write sequence.
#[derive(Default)]
pub struct PairLocks {
    cells: Mutex<HashMap<PairKey, Arc<Mutex<()>>>>,
}

impl PairLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mutex cell for a pair, creating it if absent.
    ///
    /// Callers lock the returned cell and hold the guard for the duration
    /// of the mutation:
    ///
    /// ```ignore
    /// let cell = locks.cell(&pair)?;
    /// let _guard = PairLocks::acquire(&cell)?;
    /// // read, decide, write
    /// ```
    ///
    /// # Errors
    ///
    /// Returns an error if the table lock is poisoned.
    pub fn cell(&self, pair: &PairKey) -> Result<Arc<Mutex<()>>> {
        let mut cells = self.cells.lock().map_err(|e| {
            ConnectionError::Storage(format!("Failed to acquire pair lock table: {e}"))
        })?;

        Ok(cells.entry(pair.clone()).or_default().clone())
    }

    /// Locks a pair cell, mapping poisoning to a storage error.
    ///
    /// # Errors
    ///
    /// Returns an error if the cell mutex is poisoned.
    pub fn acquire(cell: &Arc<Mutex<()>>) -> Result<std::sync::MutexGuard<'_, ()>> {
        cell.lock()
            .map_err(|e| ConnectionError::Storage(format!("Failed to acquire pair lock: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_pair_maps_to_same_cell() {
        let locks = PairLocks::new();
        let a = locks.cell(&PairKey::new("u1", "u2")).unwrap();
        let b = locks.cell(&PairKey::new("u2", "u1")).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn disjoint_pairs_do_not_contend() {
        let locks = PairLocks::new();
        let ab = locks.cell(&PairKey::new("a", "b")).unwrap();
        let cd = locks.cell(&PairKey::new("c", "d")).unwrap();

        let _held = PairLocks::acquire(&ab).unwrap();
        // The other pair's cell is still free.
        assert!(cd.try_lock().is_ok());
    }

    #[test]
    fn held_pair_blocks_second_acquirer() {
        let locks = PairLocks::new();
        let cell = locks.cell(&PairKey::new("a", "b")).unwrap();

        let _held = PairLocks::acquire(&cell).unwrap();
        assert!(cell.try_lock().is_err());
    }
}
