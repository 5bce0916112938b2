//! # Memtable Module
//!
//! The mutable in-memory layer of one column family. Writes land here and are
//! flushed into immutable data files once the buffer fills.
//!
//! Each key maps to its latest state only: `Some(value)` for a live value,
//! `None` for a tombstone that must shadow older data files until compaction
//! drops it. There is no write-ahead log: durability of a version comes from
//! the changelog or snapshot committed by the store, and a crashed engine is
//! rebuilt from those.
//!
//! The memtable itself is not synchronized; the engine guards it with its own
//! lock. Frozen memtables are shared read-only through `Arc`.

#[cfg(test)]
mod tests;

use std::{collections::BTreeMap, fmt, ops::Bound};

use thiserror::Error;
use tracing::trace;

/// Fixed per-entry overhead added to the key and value lengths when sizing
/// the buffer.
const ENTRY_OVERHEAD: usize = 32;

/// Errors returned by [`Memtable`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemtableError {
    /// Write buffer limit reached; the memtable must be frozen before
    /// further writes.
    #[error("Flush required")]
    FlushRequired,
}

/// Lookup result of a single key in one layer (memtable or data file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Live value.
    Value(Vec<u8>),
    /// A tombstone shadows the key.
    Deleted,
    /// The layer has no entry for the key.
    Absent,
}

/// In-memory, ordered write buffer.
pub struct Memtable {
    tree: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    approximate_size: usize,
    write_buffer_size: usize,
}

impl fmt::Debug for Memtable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memtable")
            .field("entries", &self.tree.len())
            .field("approximate_size", &self.approximate_size)
            .field("write_buffer_size", &self.write_buffer_size)
            .finish()
    }
}

fn entry_size(key: &[u8], value: Option<&[u8]>) -> usize {
    ENTRY_OVERHEAD + key.len() + value.map_or(0, <[u8]>::len)
}

impl Memtable {
    /// Creates an empty memtable that accepts roughly `write_buffer_size`
    /// bytes before asking to be frozen.
    pub fn new(write_buffer_size: usize) -> Self {
        Self {
            tree: BTreeMap::new(),
            approximate_size: 0,
            write_buffer_size,
        }
    }

    fn apply(&mut self, key: Vec<u8>, value: Option<Vec<u8>>) -> Result<isize, MemtableError> {
        let added = entry_size(&key, value.as_deref());
        let removed = self
            .tree
            .get(&key)
            .map_or(0, |old| entry_size(&key, old.as_deref()));

        // An empty memtable always accepts one entry, however large.
        if !self.tree.is_empty()
            && self.approximate_size - removed + added > self.write_buffer_size
        {
            return Err(MemtableError::FlushRequired);
        }

        trace!(key = %HexKey(&key), tombstone = value.is_none(), "memtable write");
        self.tree.insert(key, value);
        self.approximate_size = self.approximate_size - removed + added;
        Ok(added as isize - removed as isize)
    }

    /// Inserts or replaces a value.
    ///
    /// Returns the change in approximate size, for write buffer accounting.
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Result<isize, MemtableError> {
        self.apply(key, Some(value))
    }

    /// Records a tombstone for `key`.
    pub fn delete(&mut self, key: Vec<u8>) -> Result<isize, MemtableError> {
        self.apply(key, None)
    }

    /// Latest state of `key` in this memtable.
    pub fn get(&self, key: &[u8]) -> Lookup {
        match self.tree.get(key) {
            Some(Some(value)) => Lookup::Value(value.clone()),
            Some(None) => Lookup::Deleted,
            None => Lookup::Absent,
        }
    }

    /// Entries (tombstones included) within the given bounds, in key order.
    pub fn range<'a>(
        &'a self,
        lower: Bound<&'a [u8]>,
        upper: Bound<&'a [u8]>,
    ) -> impl Iterator<Item = (&'a [u8], Option<&'a [u8]>)> + 'a {
        self.tree
            .range::<[u8], _>((lower, upper))
            .map(|(k, v)| (k.as_slice(), v.as_deref()))
    }

    /// All entries in key order, consuming the memtable.
    pub fn into_entries(self) -> impl Iterator<Item = (Vec<u8>, Option<Vec<u8>>)> {
        self.tree.into_iter()
    }

    /// Number of distinct keys, tombstones included.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether no key has been written.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Approximate memory held by the entries.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }
}

// ------------------------------------------------------------------------------------------------
// Tracing Helper
// ------------------------------------------------------------------------------------------------

/// Hex rendering of a key, shortened for long keys.
pub(crate) struct HexKey<'a>(pub(crate) &'a [u8]);

impl fmt::Display for HexKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.0.len() <= 32 { self.0 } else { &self.0[..16] };
        for byte in shown {
            write!(f, "{byte:02x}")?;
        }
        if shown.len() < self.0.len() {
            write!(f, "...[{} bytes]", self.0.len())?;
        }
        Ok(())
    }
}
