//! Per-resource transaction bookkeeping.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Tracks the transactions of one resource.
///
/// The manager enforces the single-writer rule: at most one write
/// transaction exists per resource at any instant, and a second attempt
/// fails immediately with `WriteConflict` rather than blocking. Readers
/// are only counted; they never contend with the writer or each other.
#[derive(Debug)]
pub struct TransactionManager {
    /// Set while a write transaction is alive.
    writer_active: AtomicBool,
    /// Next transaction ID to hand out.
    next_txid: AtomicU64,
    /// Number of open read transactions.
    active_readers: AtomicU64,
}

impl TransactionManager {
    /// Creates a new manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            writer_active: AtomicBool::new(false),
            next_txid: AtomicU64::new(1),
            active_readers: AtomicU64::new(0),
        }
    }

    /// Hands out the next transaction ID.
    pub(crate) fn next_txid(&self) -> TransactionId {
        TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst))
    }

    /// Claims the writer slot.
    ///
    /// Fails immediately with `WriteConflict` if a write transaction is
    /// already active; the caller owns the retry policy.
    pub(crate) fn try_acquire_writer(&self) -> CoreResult<()> {
        if self
            .writer_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoreError::WriteConflict);
        }
        Ok(())
    }

    /// Releases the writer slot.
    ///
    /// Must be called exactly once per successful `try_acquire_writer`,
    /// on commit, abort, or drop of the write transaction.
    pub(crate) fn release_writer(&self) {
        self.writer_active.store(false, Ordering::Release);
    }

    /// Whether a write transaction is currently active.
    #[must_use]
    pub fn writer_active(&self) -> bool {
        self.writer_active.load(Ordering::Acquire)
    }

    /// Records that a read transaction opened.
    pub(crate) fn reader_opened(&self) {
        self.active_readers.fetch_add(1, Ordering::SeqCst);
    }

    /// Records that a read transaction closed.
    pub(crate) fn reader_closed(&self) {
        self.active_readers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Number of open read transactions.
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.active_readers.load(Ordering::SeqCst) as usize
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn txids_increase() {
        let manager = TransactionManager::new();
        let a = manager.next_txid();
        let b = manager.next_txid();
        assert!(a < b);
    }

    #[test]
    fn second_writer_conflicts() {
        let manager = TransactionManager::new();
        manager.try_acquire_writer().unwrap();

        let result = manager.try_acquire_writer();
        assert!(matches!(result, Err(CoreError::WriteConflict)));
    }

    #[test]
    fn writer_slot_reusable_after_release() {
        let manager = TransactionManager::new();
        manager.try_acquire_writer().unwrap();
        assert!(manager.writer_active());

        manager.release_writer();
        assert!(!manager.writer_active());
        manager.try_acquire_writer().unwrap();
    }

    #[test]
    fn reader_count_tracks_open_and_close() {
        let manager = TransactionManager::new();
        assert_eq!(manager.active_readers(), 0);

        manager.reader_opened();
        manager.reader_opened();
        assert_eq!(manager.active_readers(), 2);

        manager.reader_closed();
        assert_eq!(manager.active_readers(), 1);
    }
}
