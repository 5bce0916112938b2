//! Engine counters and latency histograms.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Count, sum, min and max of operation latencies in microseconds.
#[derive(Debug)]
pub struct OpHistogram {
    count: AtomicU64,
    sum_micros: AtomicU64,
    min_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl Default for OpHistogram {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
            min_micros: AtomicU64::new(u64::MAX),
            max_micros: AtomicU64::new(0),
        }
    }
}

impl OpHistogram {
    pub fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
        self.min_micros.fetch_min(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        HistogramSnapshot {
            count,
            sum_micros: self.sum_micros.load(Ordering::Relaxed),
            min_micros: if count == 0 {
                0
            } else {
                self.min_micros.load(Ordering::Relaxed)
            },
            max_micros: self.max_micros.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
        self.sum_micros.store(0, Ordering::Relaxed);
        self.min_micros.store(u64::MAX, Ordering::Relaxed);
        self.max_micros.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of an [`OpHistogram`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistogramSnapshot {
    /// Operations recorded.
    pub count: u64,
    /// Total latency.
    pub sum_micros: u64,
    /// Fastest operation; 0 when nothing was recorded.
    pub min_micros: u64,
    /// Slowest operation.
    pub max_micros: u64,
}

impl HistogramSnapshot {
    /// Mean latency in microseconds.
    pub fn mean_micros(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum_micros as f64 / self.count as f64
        }
    }
}

/// Live counters owned by one engine.
#[derive(Debug, Default)]
pub(crate) struct EngineStats {
    pub(crate) get: OpHistogram,
    pub(crate) put: OpHistogram,
    pub(crate) merge: OpHistogram,
    pub(crate) delete: OpHistogram,
    pub(crate) compaction: OpHistogram,
    pub(crate) stall_micros: AtomicU64,
    pub(crate) flush_bytes: AtomicU64,
    pub(crate) compaction_bytes_read: AtomicU64,
    pub(crate) compaction_bytes_written: AtomicU64,
}

impl EngineStats {
    pub(crate) fn add_stall(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.stall_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub(crate) fn reset(&self) {
        self.get.reset();
        self.put.reset();
        self.merge.reset();
        self.delete.reset();
        self.compaction.reset();
        self.stall_micros.store(0, Ordering::Relaxed);
        self.flush_bytes.store(0, Ordering::Relaxed);
        self.compaction_bytes_read.store(0, Ordering::Relaxed);
        self.compaction_bytes_written.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of engine statistics returned by [`Engine::metrics`].
///
/// [`Engine::metrics`]: super::Engine::metrics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineMetrics {
    pub get: HistogramSnapshot,
    pub put: HistogramSnapshot,
    pub merge: HistogramSnapshot,
    pub delete: HistogramSnapshot,
    pub compaction: HistogramSnapshot,
    /// Block bytes read from data files.
    pub bytes_read: u64,
    /// Bytes written to data files by flushes and compactions.
    pub bytes_written: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Time writers spent waiting on synchronous flushes.
    pub stall_micros: u64,
    pub flush_bytes: u64,
    pub compaction_bytes_read: u64,
    pub compaction_bytes_written: u64,
    /// Bytes held by the block cache this engine reads through.
    pub block_cache_usage: usize,
    /// Approximate bytes held in active and frozen memtables.
    pub memtable_bytes: usize,
    /// Live data files across all column families.
    pub live_files: usize,
    /// Total size of live data files.
    pub live_file_bytes: u64,
    /// Memtables frozen and awaiting flush.
    pub frozen_memtables: usize,
}
