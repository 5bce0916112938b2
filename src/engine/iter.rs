//! Merge primitives for reads and compaction.
//!
//! - [`MergeIterator`]: heap-based k-way merge of sorted layer streams,
//!   ordered by `(key ASC, layer ASC)` so the newest layer's entry for a key
//!   comes first.
//! - [`LiveEntries`]: keeps the first entry of every key and drops
//!   tombstones, turning a merged stream into the visible key-value pairs.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::EngineError;

/// One entry of a layer: `None` is a tombstone.
pub type LayerEntry = (Vec<u8>, Option<Vec<u8>>);

/// A sorted stream of entries from one layer (memtable or data file).
pub type LayerIter = Box<dyn Iterator<Item = Result<LayerEntry, EngineError>> + Send>;

// ------------------------------------------------------------------------------------------------
// MergeIterator
// ------------------------------------------------------------------------------------------------

struct HeapEntry {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
    /// Position of the source layer; 0 is the newest.
    layer: usize,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap: reverse so the smallest key from the newest layer pops first.
        self.key
            .cmp(&other.key)
            .then(self.layer.cmp(&other.layer))
            .reverse()
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.layer == other.layer
    }
}

impl Eq for HeapEntry {}

/// Merges layers given newest-first into one `(key ASC, newest first)` stream.
///
/// The first error from any layer is yielded once and ends the stream.
pub struct MergeIterator {
    layers: Vec<LayerIter>,
    heap: BinaryHeap<HeapEntry>,
    pending_error: Option<EngineError>,
    failed: bool,
}

impl MergeIterator {
    pub fn new(mut layers: Vec<LayerIter>) -> Self {
        let mut heap = BinaryHeap::new();
        let mut pending_error = None;

        for (layer, iter) in layers.iter_mut().enumerate() {
            match iter.next() {
                Some(Ok((key, value))) => heap.push(HeapEntry { key, value, layer }),
                Some(Err(e)) => {
                    pending_error.get_or_insert(e);
                }
                None => {}
            }
        }

        Self {
            layers,
            heap,
            pending_error,
            failed: false,
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<(Vec<u8>, Option<Vec<u8>>, usize), EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(e));
        }

        let entry = self.heap.pop()?;
        match self.layers[entry.layer].next() {
            Some(Ok((key, value))) => self.heap.push(HeapEntry {
                key,
                value,
                layer: entry.layer,
            }),
            Some(Err(e)) => {
                self.failed = true;
                return Some(Err(e));
            }
            None => {}
        }
        Some(Ok((entry.key, entry.value, entry.layer)))
    }
}

// ------------------------------------------------------------------------------------------------
// LiveEntries
// ------------------------------------------------------------------------------------------------

/// Visible key-value pairs of a merged stream.
///
/// The input must come from [`MergeIterator`]: for each key the newest
/// entry decides, and a tombstone hides the key entirely.
pub struct LiveEntries {
    input: MergeIterator,
    /// Key most recently emitted or suppressed.
    current_key: Option<Vec<u8>>,
}

impl LiveEntries {
    pub fn new(input: MergeIterator) -> Self {
        Self {
            input,
            current_key: None,
        }
    }
}

impl Iterator for LiveEntries {
    type Item = Result<(Vec<u8>, Vec<u8>), EngineError>;

    fn next(&mut self) -> Option<Self::Item> {
        for item in self.input.by_ref() {
            let (key, value, _layer) = match item {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            if self.current_key.as_deref() == Some(key.as_slice()) {
                continue;
            }
            self.current_key = Some(key.clone());

            if let Some(value) = value {
                return Some(Ok((key, value)));
            }
        }
        None
    }
}
