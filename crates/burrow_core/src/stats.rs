//! Environment statistics.
//!
//! Counters are advisory: they exist for operator visibility (periodic
//! housekeeping logs a snapshot) and never participate in control flow.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal atomic counters, updated while operations run.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    begun: AtomicU64,
    committed: AtomicU64,
    aborted: AtomicU64,
    checkpoints: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl Counters {
    pub(crate) fn record_begin(&self) {
        self.begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn begun(&self) -> u64 {
        self.begun.load(Ordering::Relaxed)
    }

    pub(crate) fn committed(&self) -> u64 {
        self.committed.load(Ordering::Relaxed)
    }

    pub(crate) fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }

    pub(crate) fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    pub(crate) fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub(crate) fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }
}

/// Best-effort diagnostic snapshot of one environment.
///
/// Produced by [`crate::Environment::stats`]. Values that could not be
/// determined are reported as zero rather than failing the snapshot.
#[derive(Debug, Clone, Default)]
pub struct EnvStats {
    /// Transactions currently active.
    pub active_txns: usize,
    /// Transactions begun since open.
    pub txns_begun: u64,
    /// Transactions committed since open.
    pub txns_committed: u64,
    /// Transactions aborted since open.
    pub txns_aborted: u64,
    /// Checkpoints completed since open.
    pub checkpoints: u64,
    /// Keys written since open.
    pub writes: u64,
    /// Keys deleted since open.
    pub deletes: u64,
    /// Highest committed sequence.
    pub committed_seq: u64,
    /// Sequence covered by the last checkpoint.
    pub checkpoint_seq: u64,
    /// Log segment files on disk.
    pub log_segments: usize,
    /// Total log volume in bytes.
    pub log_bytes: u64,
    /// Tree collections currently open.
    pub open_trees: usize,
}
