//! Cross-instance accounting of memtable memory.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

/// Tracks memtable bytes reserved by every engine sharing one memory budget.
///
/// Engines reserve bytes as they buffer writes and free them when a memtable
/// is flushed or dropped. Once usage reaches the budget, [`should_flush`]
/// tells writers to flush before buffering more.
///
/// [`should_flush`]: WriteBufferManager::should_flush
#[derive(Debug)]
pub struct WriteBufferManager {
    buffer_size: usize,
    used: AtomicUsize,
}

impl WriteBufferManager {
    /// Create a manager with a budget of `buffer_size` bytes.
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            used: AtomicUsize::new(0),
        }
    }

    /// Account for `bytes` of newly buffered data.
    pub fn reserve(&self, bytes: usize) {
        let now = self.used.fetch_add(bytes, Ordering::AcqRel) + bytes;
        trace!(bytes, used = now, "write buffer reserved");
    }

    /// Return `bytes` to the budget.
    pub fn free(&self, bytes: usize) {
        let mut current = self.used.load(Ordering::Acquire);
        loop {
            let next = current.saturating_sub(bytes);
            match self
                .used
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Bytes currently reserved.
    pub fn memory_usage(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Budget in bytes.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whether reserved memory has reached the budget.
    pub fn should_flush(&self) -> bool {
        self.buffer_size > 0 && self.memory_usage() >= self.buffer_size
    }
}
