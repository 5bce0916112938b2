//! Forward range scan over one data file.
//!
//! [`TableIter`] positions itself with the index block, then walks data
//! blocks lazily through the block cache. It yields every entry in bounds,
//! tombstones included; shadowing across files is resolved by the engine's
//! merge iterator.

use std::{ops::Bound, sync::Arc};

use super::{DataBlock, SSTable, SSTableError};

/// Sorted iterator over the entries of a single [`SSTable`].
pub struct TableIter {
    table: Arc<SSTable>,
    /// Index position of the next block to load.
    next_block: usize,
    block: Option<Arc<DataBlock>>,
    /// Position inside `block` of the next cell to yield.
    cell: usize,
    upper: Bound<Vec<u8>>,
    done: bool,
}

impl TableIter {
    pub(crate) fn new(
        table: Arc<SSTable>,
        lower: Bound<&[u8]>,
        upper: Bound<Vec<u8>>,
    ) -> Result<Self, SSTableError> {
        let index = table.index()?;

        let (start_block, seek_key) = match lower {
            Bound::Unbounded => (0, None),
            Bound::Included(k) | Bound::Excluded(k) => (
                index.partition_point(|e| e.last_key.as_slice() < k),
                Some(k),
            ),
        };

        let mut iter = Self {
            table,
            next_block: start_block,
            block: None,
            cell: 0,
            upper,
            done: false,
        };

        if let Some(key) = seek_key {
            if !iter.load_next_block()? {
                return Ok(iter);
            }
            if let Some(block) = &iter.block {
                let mut pos = block.seek(key);
                if matches!(lower, Bound::Excluded(_))
                    && block.cells.get(pos).is_some_and(|c| c.key == key)
                {
                    pos += 1;
                }
                iter.cell = pos;
            }
        }
        Ok(iter)
    }

    /// Load the block at `next_block`. Returns `false` once past the last block.
    fn load_next_block(&mut self) -> Result<bool, SSTableError> {
        let index = self.table.index()?;
        let Some(entry) = index.get(self.next_block) else {
            self.block = None;
            self.done = true;
            return Ok(false);
        };
        let block = self.table.data_block(entry.handle)?;
        self.block = Some(block);
        self.next_block += 1;
        self.cell = 0;
        Ok(true)
    }

    fn within_upper(&self, key: &[u8]) -> bool {
        match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(u) => key <= u.as_slice(),
            Bound::Excluded(u) => key < u.as_slice(),
        }
    }

    fn step(&mut self) -> Result<Option<(Vec<u8>, Option<Vec<u8>>)>, SSTableError> {
        loop {
            if self.done {
                return Ok(None);
            }
            let cell = self
                .block
                .as_ref()
                .and_then(|b| b.cells.get(self.cell).cloned());
            match cell {
                Some(cell) => {
                    self.cell += 1;
                    if !self.within_upper(&cell.key) {
                        self.done = true;
                        return Ok(None);
                    }
                    return Ok(Some((cell.key, cell.value)));
                }
                None => {
                    if !self.load_next_block()? {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl Iterator for TableIter {
    type Item = Result<(Vec<u8>, Option<Vec<u8>>), SSTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
