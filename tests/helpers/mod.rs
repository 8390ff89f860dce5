//! Reusable test helpers for connection subsystem integration tests.
//!
//! These helpers run the REAL stack: an on-disk `SQLite` database per test
//! plus the in-memory profile directory from `test-utils`. Each test gets
//! its own data directory, so suites can run in parallel.

use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use trellis_core::connection::ConnectionManager;
use trellis_core::directory::MemoryDirectory;
use trellis_core::query::QueryService;

/// Atomic counter for unique test directory names.
static HELPER_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Creates a unique temporary directory for test isolation.
///
/// Each call produces a distinct path by combining the prefix, process ID,
/// and an atomic counter.
pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let id = HELPER_COUNTER.fetch_add(1, Ordering::SeqCst);
    env::temp_dir().join(format!(
        "trellis_g_test_{}_{}_{}",
        prefix,
        std::process::id(),
        id
    ))
}

/// Removes a temporary test directory. Ignores errors silently.
pub fn cleanup_dir(dir: &PathBuf) {
    let _ = std::fs::remove_dir_all(dir);
}

/// Creates a directory pre-seeded with four well-known profiles.
pub fn seeded_directory() -> Arc<MemoryDirectory> {
    let directory = Arc::new(MemoryDirectory::new());
    for (user_id, name, email) in [
        ("u1", "Ada Lovelace", Some("ada@example.com")),
        ("u2", "Grace Hopper", Some("grace@example.com")),
        ("u3", "Alan Turing", None),
        ("u4", "Adele Goldberg", None),
    ] {
        directory.put_profile(user_id, name, Some("Engineer"), email);
    }
    directory
}

/// Opens the full stack over a fresh on-disk database in `dir`.
pub fn open_stack(dir: &PathBuf) -> (ConnectionManager, QueryService, Arc<MemoryDirectory>) {
    let directory = seeded_directory();
    let manager =
        ConnectionManager::open(dir, directory.clone()).expect("should open connection manager");
    let queries = QueryService::new(manager.storage(), directory.clone());
    (manager, queries, directory)
}
