//! Database statistics.
//!
//! Counters are kept per handle and reset when the handle is opened.
//!
//! ```rust,ignore
//! let db = Database::open(path)?;
//! db.put(b"k1", b"m1", b"v1")?;
//! let stats = db.stats();
//! println!("writes: {}", stats.writes);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Operation counters for one database handle.
///
/// All counters are atomic and can be read while operations are in progress.
#[derive(Debug, Default)]
pub struct DatabaseStats {
    /// Document reads.
    reads: AtomicU64,
    /// Document saves (puts).
    writes: AtomicU64,
    /// Deletes (tombstones written).
    deletes: AtomicU64,
    /// Commits that wrote a header.
    commits: AtomicU64,
    /// Completed compactions.
    compactions: AtomicU64,
    /// Document payload bytes written.
    bytes_written: AtomicU64,
    /// Document payload bytes read.
    bytes_read: AtomicU64,
    /// Operations that returned an error.
    errors: AtomicU64,
}

impl DatabaseStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_read(&self, bytes: u64) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self, bytes: u64) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_delete(&self, bytes: u64) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`DatabaseStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Document reads.
    pub reads: u64,
    /// Document saves.
    pub writes: u64,
    /// Deletes.
    pub deletes: u64,
    /// Commits that wrote a header.
    pub commits: u64,
    /// Completed compactions.
    pub compactions: u64,
    /// Document payload bytes written.
    pub bytes_written: u64,
    /// Document payload bytes read.
    pub bytes_read: u64,
    /// Operations that returned an error.
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        assert_eq!(DatabaseStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_operations() {
        let stats = DatabaseStats::new();
        stats.record_read(100);
        stats.record_read(50);
        stats.record_write(200);
        stats.record_delete(20);
        stats.record_commit();

        let snap = stats.snapshot();
        assert_eq!(snap.reads, 2);
        assert_eq!(snap.bytes_read, 150);
        assert_eq!(snap.writes, 1);
        assert_eq!(snap.deletes, 1);
        assert_eq!(snap.bytes_written, 220);
        assert_eq!(snap.commits, 1);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(DatabaseStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_read(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().reads, 800);
    }
}
