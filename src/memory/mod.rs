//! Memory Module
//!
//! Owns the memory-hungry objects engines share: the block cache and the
//! write buffer manager.
//!
//! Instances running with a bounded memory budget share one [`SharedMemory`]
//! per distinct [`MemoryBudget`]. Those objects are created lazily by
//! [`shared`], live in a process-wide registry guarded by a single lock, and
//! are torn down by [`reset`]. Instances without a budget get a private cache
//! from [`private`] and no write buffer accounting.

pub mod cache;
pub mod write_buffer;


pub use cache::{BlockCache, BlockKey, CacheStats, CacheValue, Priority};
pub use write_buffer::WriteBufferManager;

use std::{
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;
use tracing::{debug, info};

/// Fraction of the cache reserved for index and filter blocks in private
/// caches.
const PRIVATE_HIGH_PRIORITY_RATIO: f64 = 0.1;

/// Memory budget that identifies one set of shared objects.
///
/// Ratios are stored as raw bit patterns so the budget can be hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryBudget {
    total_bytes: usize,
    write_buffer_ratio_bits: u64,
    high_priority_ratio_bits: u64,
}

impl MemoryBudget {
    /// Budget of `total_bytes` split between write buffers and the block cache.
    pub fn new(total_bytes: usize, write_buffer_ratio: f64, high_priority_ratio: f64) -> Self {
        Self {
            total_bytes,
            write_buffer_ratio_bits: write_buffer_ratio.to_bits(),
            high_priority_ratio_bits: high_priority_ratio.to_bits(),
        }
    }

    /// Total bytes.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Share of the total given to memtables.
    pub fn write_buffer_ratio(&self) -> f64 {
        f64::from_bits(self.write_buffer_ratio_bits)
    }

    /// Share of the cache reserved for index and filter blocks.
    pub fn high_priority_ratio(&self) -> f64 {
        f64::from_bits(self.high_priority_ratio_bits)
    }

    fn write_buffer_bytes(&self) -> usize {
        (self.total_bytes as f64 * self.write_buffer_ratio()) as usize
    }
}

/// Cache and write buffer manager handed to an engine.
#[derive(Debug)]
pub struct SharedMemory {
    cache: Arc<BlockCache>,
    write_buffers: Option<Arc<WriteBufferManager>>,
    budget: Option<MemoryBudget>,
}

impl SharedMemory {
    /// The block cache.
    pub fn cache(&self) -> &Arc<BlockCache> {
        &self.cache
    }

    /// The write buffer manager, for bounded instances.
    pub fn write_buffers(&self) -> Option<&Arc<WriteBufferManager>> {
        self.write_buffers.as_ref()
    }

    /// The budget these objects were created for, if shared.
    pub fn budget(&self) -> Option<MemoryBudget> {
        self.budget
    }
}

fn registry() -> &'static Mutex<HashMap<MemoryBudget, Arc<SharedMemory>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<MemoryBudget, Arc<SharedMemory>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Shared objects for `budget`, created on first use.
///
/// Every caller passing an equal budget receives the same objects until
/// [`reset`] is called.
pub fn shared(budget: MemoryBudget) -> Arc<SharedMemory> {
    let mut registry = registry().lock();
    let entry = registry.entry(budget).or_insert_with(|| {
        let write_buffer_bytes = budget.write_buffer_bytes();
        let cache_bytes = budget.total_bytes.saturating_sub(write_buffer_bytes);
        info!(
            total_bytes = budget.total_bytes,
            cache_bytes,
            write_buffer_bytes,
            "creating shared memory objects"
        );
        Arc::new(SharedMemory {
            cache: Arc::new(BlockCache::new(cache_bytes, budget.high_priority_ratio())),
            write_buffers: Some(Arc::new(WriteBufferManager::new(write_buffer_bytes))),
            budget: Some(budget),
        })
    });
    Arc::clone(entry)
}

/// Drop every shared object from the registry.
///
/// Engines that already hold a handle keep using it; later calls to
/// [`shared`] create fresh objects.
pub fn reset() {
    let mut registry = registry().lock();
    debug!(budgets = registry.len(), "resetting shared memory objects");
    registry.clear();
}

/// Unshared objects for an instance without a memory budget.
pub fn private(cache_bytes: usize) -> Arc<SharedMemory> {
    Arc::new(SharedMemory {
        cache: Arc::new(BlockCache::new(cache_bytes, PRIVATE_HIGH_PRIORITY_RATIO)),
        write_buffers: None,
        budget: None,
    })
}
