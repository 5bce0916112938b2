//! Sorted String Table (SSTable) Module
//!
//! Immutable, memory-mapped data files produced by memtable flushes and
//! compactions. Each file belongs to exactly one column family and holds at
//! most one entry per key: either a live value or a tombstone.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_LEN_LE][MAGIC | VERSION | COLUMN_FAMILY | CODEC][HEADER_CRC32_LE]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! ...
//! [BLOOM_LEN_LE][BLOOM_BYTES][BLOOM_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER (48 bytes, own CRC32)]
//! ```
//!
//! - **Data blocks** hold consecutive cells `[u8 kind][key][value if PUT]`,
//!   compressed as a whole when the file's codec is zstd.
//! - **Bloom block** is the raw bloom filter over every key in the file.
//! - **Index block** lists, per data block, its last key and frame handle.
//! - **Footer** locates the bloom and index blocks and carries entry counts.
//!
//! Every frame checksum covers `len || bytes`, the same framing the changelog
//! uses.
//!
//! # Caching
//!
//! Bloom and index blocks are fetched through the shared [`BlockCache`] at
//! high priority; data blocks at low priority. Cache keys combine a
//! process-unique file id with the block offset, and a file's blocks are
//! erased from the cache when the file is dropped.
//!
//! # Open file limit
//!
//! A [`TableCache`] caps how many files stay memory-mapped at once. Evicted
//! files keep their parsed metadata and are re-mapped on next access.
//!
//! # Sub-modules
//!
//! - [`builder`]: [`TableBuilder`] for writing a file from sorted entries.
//! - [`iterator`]: [`TableIter`] for ordered range reads.

pub mod builder;
pub mod iterator;

#[cfg(test)]
mod tests;

pub use builder::{TableBuilder, TableProperties};
pub use iterator::TableIter;

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    fs::File,
    io,
    ops::Bound,
    path::{Path, PathBuf},
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use bloomfilter::Bloom;
use memmap2::Mmap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::config::CompressionCodec;
use crate::encoding::{self, Decode, Encode, EncodingError, Reader};
use crate::memory::{BlockCache, BlockKey, CacheValue, Priority};
use crate::memtable::Lookup;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const SST_HDR_MAGIC: [u8; 4] = *b"VSST";
const SST_FOOTER_MAGIC: [u8; 4] = *b"VSSF";
const SST_FORMAT_VERSION: u32 = 1;
const SST_BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;
const SST_DATA_BLOCK_TARGET_SIZE: usize = 4096;
const SST_FOOTER_SIZE: usize = 48;
const SST_FOOTER_CRC_OFFSET: usize = SST_FOOTER_SIZE - 4;
const CELL_PUT: u8 = 0;
const CELL_TOMBSTONE: u8 = 1;

/// File extension of data files.
pub const SST_EXTENSION: &str = "sst";

static NEXT_TABLE_UID: AtomicU64 = AtomicU64::new(1);

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations (read, write, build).
#[derive(Debug, Error)]
pub enum SSTableError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Structurally invalid file.
    #[error("Corrupt data file {path}: {reason}")]
    Corrupt {
        /// File being read.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// Keys were not added in strictly ascending order.
    #[error("keys out of order while building data file")]
    OutOfOrder,

    /// A file with no entries was about to be written.
    #[error("refusing to build an empty data file")]
    Empty,

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// I/O counters
// ------------------------------------------------------------------------------------------------

/// Byte and cache counters shared by every file of one engine.
#[derive(Debug, Default)]
pub struct IoCounters {
    /// Block bytes read from mapped files.
    pub bytes_read: AtomicU64,
    /// Bytes written to new data files.
    pub bytes_written: AtomicU64,
    /// Block lookups served by the cache.
    pub cache_hits: AtomicU64,
    /// Block lookups that went to the file.
    pub cache_misses: AtomicU64,
}

impl IoCounters {
    /// Zero every counter.
    pub fn reset(&self) {
        self.bytes_read.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
    }
}

// ------------------------------------------------------------------------------------------------
// On-disk structures
// ------------------------------------------------------------------------------------------------

/// Location of one framed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockHandle {
    pub(crate) offset: u64,
    pub(crate) size: u64,
}

/// Directory entry for one data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub(crate) last_key: Vec<u8>,
    pub(crate) handle: BlockHandle,
}

impl Encode for IndexEntry {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        self.last_key.encode_to(buf)?;
        self.handle.offset.encode_to(buf)?;
        self.handle.size.encode_to(buf)
    }
}

impl Decode for IndexEntry {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut r = Reader::new(buf);
        let last_key = r.read::<Vec<u8>>()?;
        let offset = r.read::<u64>()?;
        let size = r.read::<u64>()?;
        Ok((
            Self {
                last_key,
                handle: BlockHandle { offset, size },
            },
            r.position(),
        ))
    }
}

/// Fixed-size trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Footer {
    pub(crate) bloom: BlockHandle,
    pub(crate) index: BlockHandle,
    pub(crate) entry_count: u64,
    pub(crate) tombstone_count: u64,
}

impl Footer {
    pub(crate) fn to_bytes(self) -> Result<Vec<u8>, EncodingError> {
        let mut buf = Vec::with_capacity(SST_FOOTER_SIZE);
        self.bloom.offset.encode_to(&mut buf)?;
        (self.bloom.size as u32).encode_to(&mut buf)?;
        self.index.offset.encode_to(&mut buf)?;
        (self.index.size as u32).encode_to(&mut buf)?;
        self.entry_count.encode_to(&mut buf)?;
        self.tombstone_count.encode_to(&mut buf)?;
        SST_FOOTER_MAGIC.encode_to(&mut buf)?;
        let crc = crc32fast::hash(&buf);
        crc.encode_to(&mut buf)?;
        Ok(buf)
    }

    fn from_bytes(path: &Path, buf: &[u8]) -> Result<Self, SSTableError> {
        if buf.len() != SST_FOOTER_SIZE {
            return Err(corrupt(path, "footer has the wrong size"));
        }
        let stored = u32::from_le_bytes(
            buf[SST_FOOTER_CRC_OFFSET..]
                .try_into()
                .map_err(|_| corrupt(path, "footer checksum unreadable"))?,
        );
        if stored != crc32fast::hash(&buf[..SST_FOOTER_CRC_OFFSET]) {
            return Err(corrupt(path, "footer checksum mismatch"));
        }

        let mut r = Reader::new(buf);
        let bloom_offset = r.read::<u64>()?;
        let bloom_size = u64::from(r.read::<u32>()?);
        let index_offset = r.read::<u64>()?;
        let index_size = u64::from(r.read::<u32>()?);
        let entry_count = r.read::<u64>()?;
        let tombstone_count = r.read::<u64>()?;
        if r.read::<[u8; 4]>()? != SST_FOOTER_MAGIC {
            return Err(corrupt(path, "footer magic mismatch"));
        }
        Ok(Self {
            bloom: BlockHandle {
                offset: bloom_offset,
                size: bloom_size,
            },
            index: BlockHandle {
                offset: index_offset,
                size: index_size,
            },
            entry_count,
            tombstone_count,
        })
    }
}

/// One cell of a decoded data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Cell {
    pub(crate) key: Vec<u8>,
    pub(crate) value: Option<Vec<u8>>,
}

/// A decoded data block, as stored in the block cache.
#[derive(Debug)]
pub(crate) struct DataBlock {
    pub(crate) cells: Vec<Cell>,
}

impl DataBlock {
    pub(crate) fn encode_cell(
        key: &[u8],
        value: Option<&[u8]>,
        buf: &mut Vec<u8>,
    ) -> Result<(), EncodingError> {
        match value {
            Some(v) => {
                CELL_PUT.encode_to(buf)?;
                key.encode_to(buf)?;
                v.encode_to(buf)
            }
            None => {
                CELL_TOMBSTONE.encode_to(buf)?;
                key.encode_to(buf)
            }
        }
    }

    fn decode(raw: &[u8]) -> Result<Self, EncodingError> {
        let mut r = Reader::new(raw);
        let mut cells = Vec::new();
        while !r.is_empty() {
            let kind = r.read::<u8>()?;
            let key = r.read::<Vec<u8>>()?;
            let value = match kind {
                CELL_PUT => Some(r.read::<Vec<u8>>()?),
                CELL_TOMBSTONE => None,
                other => {
                    return Err(EncodingError::InvalidTag {
                        tag: u32::from(other),
                        type_name: "Cell",
                    });
                }
            };
            cells.push(Cell { key, value });
        }
        Ok(Self { cells })
    }

    fn charge(&self) -> usize {
        self.cells
            .iter()
            .map(|c| 16 + c.key.len() + c.value.as_ref().map_or(0, Vec::len))
            .sum()
    }

    /// Index of the first cell with key ≥ `key`.
    pub(crate) fn seek(&self, key: &[u8]) -> usize {
        self.cells.partition_point(|c| c.key.as_slice() < key)
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> SSTableError {
    SSTableError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Parse the numeric file number from a `NNNNNN.sst` name.
pub fn parse_file_number(path: &Path) -> Option<u64> {
    if path.extension().and_then(|e| e.to_str()) != Some(SST_EXTENSION) {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

/// File name of data file `number`.
pub fn file_name(number: u64) -> String {
    format!("{number:06}.{SST_EXTENSION}")
}

// ------------------------------------------------------------------------------------------------
// TableCache: open file limiter
// ------------------------------------------------------------------------------------------------

#[derive(Default)]
struct TableCacheState {
    mapped: VecDeque<u64>,
    handles: HashMap<u64, Weak<SSTable>>,
}

/// Keeps at most `limit` data files memory-mapped.
pub struct TableCache {
    limit: Option<usize>,
    state: Mutex<TableCacheState>,
}

impl fmt::Debug for TableCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableCache")
            .field("limit", &self.limit)
            .field("mapped", &self.mapped_count())
            .finish()
    }
}

impl TableCache {
    /// `max_open_files` of −1 (or any negative value) means no limit.
    pub fn new(max_open_files: i32) -> Self {
        Self {
            limit: usize::try_from(max_open_files).ok().filter(|n| *n > 0),
            state: Mutex::new(TableCacheState::default()),
        }
    }

    fn register(&self, table: &Arc<SSTable>) {
        self.state
            .lock()
            .handles
            .insert(table.uid, Arc::downgrade(table));
    }

    fn forget(&self, uid: u64) {
        let mut state = self.state.lock();
        state.handles.remove(&uid);
        state.mapped.retain(|u| *u != uid);
    }

    /// Record that `uid` is mapped and most recently used; unmap the least
    /// recently used files beyond the limit.
    fn touch(&self, uid: u64) {
        let victims: Vec<Arc<SSTable>> = {
            let mut state = self.state.lock();
            if let Some(pos) = state.mapped.iter().position(|u| *u == uid) {
                state.mapped.remove(pos);
            }
            state.mapped.push_back(uid);

            let Some(limit) = self.limit else {
                return;
            };
            let mut victims = Vec::new();
            while state.mapped.len() > limit {
                let Some(old) = state.mapped.pop_front() else {
                    break;
                };
                if let Some(table) = state.handles.get(&old).and_then(Weak::upgrade) {
                    victims.push(table);
                }
            }
            victims
        };
        for table in victims {
            table.release_mapping();
        }
    }

    /// Number of files currently mapped.
    pub fn mapped_count(&self) -> usize {
        self.state.lock().mapped.len()
    }
}

// ------------------------------------------------------------------------------------------------
// SSTable: immutable reader
// ------------------------------------------------------------------------------------------------

/// Shared services a data file reads through.
#[derive(Debug, Clone)]
pub struct TableContext {
    /// Block cache.
    pub cache: Arc<BlockCache>,
    /// Open file limiter.
    pub table_cache: Arc<TableCache>,
    /// Engine counters.
    pub io: Arc<IoCounters>,
}

/// An immutable, memory-mapped data file.
pub struct SSTable {
    uid: u64,
    number: u64,
    path: PathBuf,
    column_family: String,
    codec: CompressionCodec,
    footer: Footer,
    file_size: u64,
    mapping: Mutex<Option<Arc<Mmap>>>,
    ctx: TableContext,
}

impl fmt::Debug for SSTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SSTable")
            .field("number", &self.number)
            .field("column_family", &self.column_family)
            .field("entries", &self.footer.entry_count)
            .field("file_size", &self.file_size)
            .finish()
    }
}

impl SSTable {
    /// Opens a data file, verifying its header and footer.
    ///
    /// # Safety
    ///
    /// Uses `unsafe { Mmap::map(...) }`: data files are never modified after
    /// they are renamed into place, and every block boundary is checked
    /// against the mapping before slicing.
    pub fn open(path: impl AsRef<Path>, ctx: TableContext) -> Result<Arc<Self>, SSTableError> {
        let path = path.as_ref();
        let number = parse_file_number(path)
            .ok_or_else(|| corrupt(path, "file name is not NNNNNN.sst"))?;
        let mmap = Self::map(path)?;

        let (header, _) = encoding::read_frame(&mmap)?;
        let mut r = Reader::new(header);
        if r.read::<[u8; 4]>()? != SST_HDR_MAGIC {
            return Err(corrupt(path, "header magic mismatch"));
        }
        let version = r.read::<u32>()?;
        if version != SST_FORMAT_VERSION {
            return Err(corrupt(path, format!("unsupported format version {version}")));
        }
        let column_family = r.read::<String>()?;
        let codec = CompressionCodec::from_tag(r.read::<u8>()?)
            .ok_or_else(|| corrupt(path, "unknown compression codec"))?;

        if mmap.len() < SST_FOOTER_SIZE {
            return Err(corrupt(path, "file too small"));
        }
        let footer = Footer::from_bytes(path, &mmap[mmap.len() - SST_FOOTER_SIZE..])?;
        let file_size = mmap.len() as u64;

        let table = Arc::new(Self {
            uid: NEXT_TABLE_UID.fetch_add(1, Ordering::Relaxed),
            number,
            path: path.to_path_buf(),
            column_family,
            codec,
            footer,
            file_size,
            mapping: Mutex::new(Some(Arc::new(mmap))),
            ctx,
        });
        table.ctx.table_cache.register(&table);
        table.ctx.table_cache.touch(table.uid);

        debug!(
            path = %table.path.display(),
            column_family = %table.column_family,
            entries = table.footer.entry_count,
            "data file opened"
        );
        Ok(table)
    }

    fn map(path: &Path) -> Result<Mmap, SSTableError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(mmap)
    }

    /// Current mapping, re-mapping the file if the table cache evicted it.
    fn mapped(&self) -> Result<Arc<Mmap>, SSTableError> {
        let mmap = {
            let mut slot = self.mapping.lock();
            match slot.as_ref() {
                Some(m) => Arc::clone(m),
                None => {
                    trace!(path = %self.path.display(), "re-mapping data file");
                    let m = Arc::new(Self::map(&self.path)?);
                    *slot = Some(Arc::clone(&m));
                    m
                }
            }
        };
        self.ctx.table_cache.touch(self.uid);
        Ok(mmap)
    }

    fn release_mapping(&self) {
        if self.mapping.lock().take().is_some() {
            trace!(path = %self.path.display(), "data file unmapped");
        }
    }

    /// Whether the file is currently memory-mapped.
    pub fn is_mapped(&self) -> bool {
        self.mapping.lock().is_some()
    }

    fn read_frame_at(&self, handle: BlockHandle) -> Result<Vec<u8>, SSTableError> {
        let mmap = self.mapped()?;
        let start = usize::try_from(handle.offset)
            .map_err(|_| corrupt(&self.path, "block offset overflow"))?;
        let end = start
            .checked_add(handle.size as usize)
            .filter(|end| *end <= mmap.len())
            .ok_or_else(|| corrupt(&self.path, "block handle out of bounds"))?;

        let (payload, consumed) = encoding::read_frame(&mmap[start..end])?;
        if consumed as u64 != handle.size {
            return Err(corrupt(&self.path, "block length disagrees with its handle"));
        }
        self.ctx
            .io
            .bytes_read
            .fetch_add(handle.size, Ordering::Relaxed);
        Ok(payload.to_vec())
    }

    /// Fetch a block through the cache, decoding it with `decode` on a miss.
    fn cached<T, F>(
        &self,
        handle: BlockHandle,
        priority: Priority,
        decode: F,
    ) -> Result<Arc<T>, SSTableError>
    where
        T: Send + Sync + 'static,
        F: FnOnce(Vec<u8>) -> Result<(T, usize), SSTableError>,
    {
        let key = BlockKey {
            file_uid: self.uid,
            offset: handle.offset,
        };
        if let Some(hit) = self.ctx.cache.get(&key).and_then(|v| v.downcast::<T>().ok()) {
            self.ctx.io.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        self.ctx.io.cache_misses.fetch_add(1, Ordering::Relaxed);

        let (value, charge) = decode(self.read_frame_at(handle)?)?;
        let value = Arc::new(value);
        let erased: CacheValue = value.clone();
        self.ctx.cache.insert(key, erased, charge, priority);
        Ok(value)
    }

    pub(crate) fn index(&self) -> Result<Arc<Vec<IndexEntry>>, SSTableError> {
        self.cached(self.footer.index, Priority::High, |raw| {
            let (entries, _) = encoding::decode_vec::<IndexEntry>(&raw)?;
            Ok((entries, raw.len()))
        })
    }

    fn bloom(&self) -> Result<Arc<Bloom<[u8]>>, SSTableError> {
        let path = &self.path;
        self.cached(self.footer.bloom, Priority::High, |raw| {
            let bloom = Bloom::<[u8]>::from_slice(&raw).map_err(|e| corrupt(path, e.to_string()))?;
            Ok((bloom, raw.len()))
        })
    }

    pub(crate) fn data_block(&self, handle: BlockHandle) -> Result<Arc<DataBlock>, SSTableError> {
        let codec = self.codec;
        self.cached(handle, Priority::Low, |raw| {
            let raw = match codec {
                CompressionCodec::Uncompressed => raw,
                CompressionCodec::Zstd => zstd::decode_all(raw.as_slice())?,
            };
            let block = DataBlock::decode(&raw)?;
            let charge = block.charge();
            Ok((block, charge))
        })
    }

    /// Point lookup of `key` in this file.
    pub fn get(&self, key: &[u8]) -> Result<Lookup, SSTableError> {
        if !self.bloom()?.check(key) {
            return Ok(Lookup::Absent);
        }

        let index = self.index()?;
        let block_idx = index.partition_point(|e| e.last_key.as_slice() < key);
        let Some(entry) = index.get(block_idx) else {
            return Ok(Lookup::Absent);
        };

        let block = self.data_block(entry.handle)?;
        let pos = block.seek(key);
        Ok(match block.cells.get(pos) {
            Some(cell) if cell.key == key => match &cell.value {
                Some(v) => Lookup::Value(v.clone()),
                None => Lookup::Deleted,
            },
            _ => Lookup::Absent,
        })
    }

    /// Ordered iterator over entries (tombstones included) within bounds.
    pub fn range(
        self: &Arc<Self>,
        lower: Bound<&[u8]>,
        upper: Bound<Vec<u8>>,
    ) -> Result<TableIter, SSTableError> {
        TableIter::new(Arc::clone(self), lower, upper)
    }

    /// Process-unique id used for cache keys.
    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// File number parsed from the file name.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Column family this file belongs to.
    pub fn column_family(&self) -> &str {
        &self.column_family
    }

    /// Size on disk in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Entries stored, tombstones included.
    pub fn entry_count(&self) -> u64 {
        self.footer.entry_count
    }

    /// Tombstones stored.
    pub fn tombstone_count(&self) -> u64 {
        self.footer.tombstone_count
    }

    /// Block codec.
    pub fn codec(&self) -> CompressionCodec {
        self.codec
    }
}

impl Drop for SSTable {
    fn drop(&mut self) {
        self.ctx.cache.erase_file(self.uid);
        self.ctx.table_cache.forget(self.uid);
    }
}
