//! Store-level metrics.
//!
//! [`StoreMetrics`] combines the timings of the last commit, the file
//! manager's transfer counters and a snapshot of the engine's counters and
//! histograms.

use std::time::Duration;

use crate::engine::EngineMetrics;
use crate::error::CommitStage;
use crate::file_manager::FileManagerMetrics;

/// Time spent in each phase of the most recent commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitTimings {
    pub write_batch: Duration,
    pub flush: Duration,
    pub compaction: Duration,
    pub checkpoint: Duration,
    pub changelog: Duration,
    pub file_sync: Duration,
}

impl CommitTimings {
    pub(crate) fn record(&mut self, stage: CommitStage, elapsed: Duration) {
        *self.slot(stage) += elapsed;
    }

    fn slot(&mut self, stage: CommitStage) -> &mut Duration {
        match stage {
            CommitStage::WriteBatch => &mut self.write_batch,
            CommitStage::Flush => &mut self.flush,
            CommitStage::Compaction => &mut self.compaction,
            CommitStage::Checkpoint => &mut self.checkpoint,
            CommitStage::Changelog => &mut self.changelog,
            CommitStage::FileSync => &mut self.file_sync,
        }
    }

    /// Time recorded for `stage`.
    pub fn get(&self, stage: CommitStage) -> Duration {
        match stage {
            CommitStage::WriteBatch => self.write_batch,
            CommitStage::Flush => self.flush,
            CommitStage::Compaction => self.compaction,
            CommitStage::Checkpoint => self.checkpoint,
            CommitStage::Changelog => self.changelog,
            CommitStage::FileSync => self.file_sync,
        }
    }

    /// Sum over all phases.
    pub fn total(&self) -> Duration {
        self.write_batch
            + self.flush
            + self.compaction
            + self.checkpoint
            + self.changelog
            + self.file_sync
    }
}

/// Snapshot returned by [`VersionedStore::metrics`](crate::VersionedStore::metrics).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreMetrics {
    /// Version the local engine reflects, if any.
    pub loaded_version: Option<u64>,
    /// Live keys after the last commit; `None` when row tracking is off.
    pub num_committed_keys: Option<u64>,
    /// Phase timings of the last successful commit.
    pub last_commit: CommitTimings,
    /// Local snapshots captured and not yet uploaded.
    pub pending_snapshots: usize,
    pub file_manager: FileManagerMetrics,
    /// Engine counters; default when no engine is open.
    pub engine: EngineMetrics,
    /// Capacity of the block cache the store reads through.
    pub block_cache_capacity: usize,
}
