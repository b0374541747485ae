use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept for the lifetime of a bucket.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
    pub filtered_out: AtomicU64,
    pub tiled: AtomicU64,
    pub map_failures: AtomicU64,
    pub degenerate_tiles: AtomicU64,
    pub mosaics_written: AtomicU64,
    pub write_failures: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BucketStats {
        BucketStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            filtered_out: self.filtered_out.load(Ordering::Relaxed),
            tiled: self.tiled.load(Ordering::Relaxed),
            map_failures: self.map_failures.load(Ordering::Relaxed),
            degenerate_tiles: self.degenerate_tiles.load(Ordering::Relaxed),
            mosaics_written: self.mosaics_written.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a bucket's counters.
///
/// Every accepted frame ends up counted exactly once in `tiled`,
/// `map_failures` or `degenerate_tiles`, or is still queued.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BucketStats {
    /// Frames that entered the queue.
    pub accepted: u64,
    /// Frames dropped because the queue was full.
    pub rejected: u64,
    /// Frames the novelty filter kept out of the queue.
    pub filtered_out: u64,
    pub tiled: u64,
    pub map_failures: u64,
    pub degenerate_tiles: u64,
    pub mosaics_written: u64,
    pub write_failures: u64,
}

impl BucketStats {
    /// Frames that left the queue through the digestion worker.
    pub fn digested(&self) -> u64 {
        self.tiled + self.map_failures + self.degenerate_tiles
    }
}
