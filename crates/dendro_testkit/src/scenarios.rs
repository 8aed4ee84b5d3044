//! Cross-crate scenario tests for the engine's core guarantees.
//!
//! These exercise whole stacks (database, resource, transactions, pages,
//! hashing) the way embedding layers do, rather than one module at a
//! time.

use dendro_core::Database;

/// Runs a closure against a fresh in-memory database.
pub fn with_memory_db<F>(f: F)
where
    F: FnOnce(&Database),
{
    let db = Database::open_in_memory();
    f(&db);
}
