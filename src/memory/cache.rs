//! Byte-charged LRU block cache with two priority pools.
//!
//! Index and bloom blocks are inserted at [`Priority::High`], data blocks at
//! [`Priority::Low`]. While the high-priority pool stays within its share of
//! the capacity, eviction takes low-priority blocks first, so a scan over
//! cold data cannot push the metadata of every open file out of memory.

use std::{
    any::Any,
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use tracing::trace;

/// Value type stored in the cache. Readers downcast to the block type they
/// inserted.
pub type CacheValue = Arc<dyn Any + Send + Sync>;

/// Identity of a cached block: the process-unique id of the file that owns it
/// and the block's offset in that file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockKey {
    /// Process-unique file id.
    pub file_uid: u64,
    /// Byte offset of the block.
    pub offset: u64,
}

/// Pool a block is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Index and filter blocks.
    High,
    /// Data blocks.
    Low,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found the block.
    pub hits: u64,
    /// Lookups that missed.
    pub misses: u64,
    /// Bytes currently charged.
    pub usage: u64,
    /// Bytes currently charged to the high-priority pool.
    pub high_priority_usage: u64,
    /// Configured capacity in bytes.
    pub capacity: u64,
}

struct Slot {
    value: CacheValue,
    charge: usize,
    priority: Priority,
    tick: u64,
}

#[derive(Default)]
struct LruState {
    slots: HashMap<BlockKey, Slot>,
    high_order: BTreeMap<u64, BlockKey>,
    low_order: BTreeMap<u64, BlockKey>,
    usage: usize,
    high_usage: usize,
    tick: u64,
}

impl LruState {
    fn order_mut(&mut self, priority: Priority) -> &mut BTreeMap<u64, BlockKey> {
        match priority {
            Priority::High => &mut self.high_order,
            Priority::Low => &mut self.low_order,
        }
    }

    fn remove(&mut self, key: &BlockKey) -> Option<Slot> {
        let slot = self.slots.remove(key)?;
        self.order_mut(slot.priority).remove(&slot.tick);
        self.usage -= slot.charge;
        if slot.priority == Priority::High {
            self.high_usage -= slot.charge;
        }
        Some(slot)
    }

    fn evict_one(&mut self, high_capacity: usize) -> bool {
        let from_high = self.high_usage > high_capacity || self.low_order.is_empty();
        let order = if from_high {
            &self.high_order
        } else {
            &self.low_order
        };
        let Some((_, key)) = order.iter().next().map(|(t, k)| (*t, *k)) else {
            return false;
        };
        self.remove(&key).is_some()
    }
}

/// Shared LRU block cache.
pub struct BlockCache {
    state: Mutex<LruState>,
    capacity: usize,
    high_capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCache")
            .field("capacity", &self.capacity)
            .field("high_capacity", &self.high_capacity)
            .field("usage", &self.usage())
            .finish()
    }
}

impl BlockCache {
    /// Create a cache of `capacity` bytes, reserving `high_priority_ratio`
    /// of it for high-priority blocks.
    pub fn new(capacity: usize, high_priority_ratio: f64) -> Self {
        let ratio = high_priority_ratio.clamp(0.0, 1.0);
        Self {
            state: Mutex::new(LruState::default()),
            capacity,
            high_capacity: (capacity as f64 * ratio) as usize,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a block and mark it most recently used.
    pub fn get(&self, key: &BlockKey) -> Option<CacheValue> {
        let mut state = self.state.lock();
        state.tick += 1;
        let tick = state.tick;

        let found = state.slots.get_mut(key).map(|slot| {
            let previous = (slot.tick, slot.priority);
            slot.tick = tick;
            (previous, Arc::clone(&slot.value))
        });
        let Some(((old_tick, priority), value)) = found else {
            drop(state);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let order = state.order_mut(priority);
        order.remove(&old_tick);
        order.insert(tick, *key);
        drop(state);

        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(value)
    }

    /// Insert a block charged at `charge` bytes, evicting as needed.
    ///
    /// Blocks larger than the whole cache are not retained; the call returns
    /// `false` in that case.
    pub fn insert(
        &self,
        key: BlockKey,
        value: CacheValue,
        charge: usize,
        priority: Priority,
    ) -> bool {
        if charge > self.capacity {
            return false;
        }
        let mut state = self.state.lock();
        state.remove(&key);

        state.tick += 1;
        let tick = state.tick;
        state.usage += charge;
        if priority == Priority::High {
            state.high_usage += charge;
        }
        state.order_mut(priority).insert(tick, key);
        state.slots.insert(
            key,
            Slot {
                value,
                charge,
                priority,
                tick,
            },
        );

        while state.usage > self.capacity {
            if !state.evict_one(self.high_capacity) {
                break;
            }
        }
        trace!(file_uid = key.file_uid, offset = key.offset, charge, "block cached");
        true
    }

    /// Drop every block belonging to `file_uid`.
    pub fn erase_file(&self, file_uid: u64) {
        let mut state = self.state.lock();
        let keys: Vec<BlockKey> = state
            .slots
            .keys()
            .filter(|k| k.file_uid == file_uid)
            .copied()
            .collect();
        for key in keys {
            state.remove(&key);
        }
    }

    /// Bytes currently charged.
    pub fn usage(&self) -> usize {
        self.state.lock().usage
    }

    /// Configured capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            usage: state.usage as u64,
            high_priority_usage: state.high_usage as u64,
            capacity: self.capacity as u64,
        }
    }
}
