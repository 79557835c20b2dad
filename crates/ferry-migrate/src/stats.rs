//! Aggregate counters shared by all migration workers.

use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{info, warn};

/// Four migration counters.
///
/// `failed` starts at `total` and is decremented as repositories succeed or
/// are skipped, so a task that dies without reporting stays counted as
/// failed. Values read while workers run are approximate; only the snapshot
/// taken after the pool drains is authoritative.
#[derive(Debug, Default)]
pub struct MigrationStats {
    total: AtomicUsize,
    succeeded: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

/// Point-in-time copy of [`MigrationStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Repositories discovered.
    pub total: usize,
    /// Repositories migrated in this run.
    pub succeeded: usize,
    /// Repositories skipped (already migrated, unsupported, existing target).
    pub skipped: usize,
    /// Repositories that failed or never reported.
    pub failed: usize,
}

impl StatsSnapshot {
    /// Whether anything needs a look at the logs.
    pub fn needs_attention(&self) -> bool {
        self.failed > 0 || self.skipped > 0
    }
}

impl MigrationStats {
    /// Counters for `total` discovered repositories.
    pub fn new(total: usize) -> Self {
        Self {
            total: AtomicUsize::new(total),
            succeeded: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            failed: AtomicUsize::new(total),
        }
    }

    /// A repository was migrated.
    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
        self.resolve_pending();
    }

    /// A repository was skipped.
    pub fn record_skip(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.resolve_pending();
    }

    fn resolve_pending(&self) {
        let _ = self
            .failed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    /// Current counter values.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total.load(Ordering::SeqCst),
            succeeded: self.succeeded.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// Log the final summary.
    pub fn log_summary(&self) -> StatsSnapshot {
        let snapshot = self.snapshot();
        info!(
            total = snapshot.total,
            succeeded = snapshot.succeeded,
            skipped = snapshot.skipped,
            failed = snapshot.failed,
            "Migration finished"
        );
        if snapshot.needs_attention() {
            warn!(
                skipped = snapshot.skipped,
                failed = snapshot.failed,
                "Some repositories were skipped or failed, check the log for details"
            );
        }
        snapshot
    }
}
