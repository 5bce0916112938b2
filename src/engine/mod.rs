//! # Local LSM Engine
//!
//! A single-node, synchronous LSM engine holding the working state of one
//! store instance. The engine is a cache of remote state: it keeps no
//! write-ahead log, and after a crash it is rebuilt from a checkpoint plus
//! changelog replay rather than recovered locally.
//!
//! ## Layout
//!
//! Data is partitioned into column families. Each family has three layers,
//! queried newest-first:
//!
//! 1. **Active memtable**: the sorted write buffer.
//! 2. **Frozen memtables**: full buffers awaiting flush.
//! 3. **Data files**: immutable `NNNNNN.sst` files in the engine directory.
//!    The owning family is recorded in each file's header, so reopening a
//!    directory restores every family without a separate manifest.
//!
//! ## Writes and flushes
//!
//! When the active memtable is full it is frozen. Once active plus frozen
//! memtables reach `max_write_buffer_number`, the writer flushes the frozen
//! ones synchronously; the time spent is reported as stall time. A shared
//! [`WriteBufferManager`] over budget triggers the same flush for every
//! family.
//!
//! ## Merge
//!
//! `merge` is a read-modify-write through the configured [`MergeOperator`]
//! (string append by default), stored as a plain value.
//!
//! ## Concurrency
//!
//! All state sits behind one `RwLock`. Reads take the read lock; writes,
//! flushes, compactions and checkpoints take the write lock. Scans copy the
//! memtable layers under the lock and stream data files lazily afterwards.
//!
//! [`WriteBufferManager`]: crate::memory::WriteBufferManager

mod batch;
pub mod iter;
mod stats;

#[cfg(test)]
mod tests;

pub use batch::{BatchOp, MERGE_DELIMITER, MergeOperator, StringAppendOperator, WriteBatch};
pub use iter::{LiveEntries, MergeIterator};
pub use stats::{EngineMetrics, HistogramSnapshot, OpHistogram};

use std::{
    cmp::Reverse,
    collections::BTreeMap,
    fmt, fs, io, mem,
    ops::Bound,
    path::{Path, PathBuf},
    sync::{Arc, atomic::Ordering},
    time::Instant,
};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::CompressionCodec;
use crate::memory::SharedMemory;
use crate::memtable::{HexKey, Lookup, Memtable, MemtableError};
use crate::sstable::{
    self, IoCounters, SSTable, SSTableError, TableBuilder, TableCache, TableContext,
};

use iter::LayerIter;
use stats::EngineStats;

/// Memtable size used when none is configured.
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Error originating from the memtable subsystem.
    #[error("Memtable error: {0}")]
    Memtable(#[from] MemtableError),

    /// Error originating from the SSTable subsystem.
    #[error("SSTable error: {0}")]
    SSTable(#[from] SSTableError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Options
// ------------------------------------------------------------------------------------------------

/// Configuration for an [`Engine`] instance. Passed to [`Engine::open`].
#[derive(Clone)]
pub struct EngineOptions {
    /// Max memtable size (bytes) before freeze.
    pub write_buffer_size: usize,

    /// Active plus frozen memtables allowed before a synchronous flush.
    pub max_write_buffer_number: usize,

    /// Data block codec for new files.
    pub compression: CompressionCodec,

    /// Data files kept memory-mapped at once; negative for no limit.
    pub max_open_files: i32,

    /// Reserve data file space before writing.
    pub allow_fallocate: bool,

    /// Block cache and write buffer accounting.
    pub memory: Arc<SharedMemory>,

    /// Operator behind [`Engine::merge`].
    pub merge_operator: Arc<dyn MergeOperator>,
}

impl EngineOptions {
    /// Defaults around the given memory objects.
    pub fn new(memory: Arc<SharedMemory>) -> Self {
        Self {
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            max_write_buffer_number: 2,
            compression: CompressionCodec::Uncompressed,
            max_open_files: -1,
            allow_fallocate: true,
            memory,
            merge_operator: Arc::new(StringAppendOperator),
        }
    }
}

impl fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOptions")
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_write_buffer_number", &self.max_write_buffer_number)
            .field("compression", &self.compression)
            .field("max_open_files", &self.max_open_files)
            .field("allow_fallocate", &self.allow_fallocate)
            .finish_non_exhaustive()
    }
}

// ------------------------------------------------------------------------------------------------
// State
// ------------------------------------------------------------------------------------------------

struct ColumnFamily {
    active: Memtable,
    /// Newest first.
    frozen: Vec<Memtable>,
    /// Newest first.
    tables: Vec<Arc<SSTable>>,
}

impl ColumnFamily {
    fn new(write_buffer_size: usize) -> Self {
        Self {
            active: Memtable::new(write_buffer_size),
            frozen: Vec::new(),
            tables: Vec::new(),
        }
    }

    fn freeze(&mut self, write_buffer_size: usize) {
        let full = mem::replace(&mut self.active, Memtable::new(write_buffer_size));
        self.frozen.insert(0, full);
    }

    fn memtable_bytes(&self) -> usize {
        self.active.approximate_size()
            + self
                .frozen
                .iter()
                .map(Memtable::approximate_size)
                .sum::<usize>()
    }
}

struct EngineInner {
    families: BTreeMap<String, ColumnFamily>,
    next_file_number: u64,
}

/// The local engine handle.
pub struct Engine {
    dir: PathBuf,
    opts: EngineOptions,
    ctx: TableContext,
    stats: EngineStats,
    inner: RwLock<EngineInner>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.dir)
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

fn insert(
    memtable: &mut Memtable,
    key: &[u8],
    value: Option<&[u8]>,
) -> Result<isize, MemtableError> {
    match value {
        Some(v) => memtable.put(key.to_vec(), v.to_vec()),
        None => memtable.delete(key.to_vec()),
    }
}

/// Smallest key greater than every key starting with `prefix`, if any.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

fn owned_bound(bound: Bound<&[u8]>) -> Bound<Vec<u8>> {
    match bound {
        Bound::Included(k) => Bound::Included(k.to_vec()),
        Bound::Excluded(k) => Bound::Excluded(k.to_vec()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

fn memtable_layer(memtable: &Memtable, lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> LayerIter {
    let entries: Vec<_> = memtable
        .range(lower, upper)
        .map(|(k, v)| Ok((k.to_vec(), v.map(<[u8]>::to_vec))))
        .collect();
    Box::new(entries.into_iter())
}

fn table_layer(
    table: &Arc<SSTable>,
    lower: Bound<&[u8]>,
    upper: Bound<Vec<u8>>,
) -> Result<LayerIter, EngineError> {
    let iter = table.range(lower, upper)?;
    Ok(Box::new(iter.map(|r| r.map_err(EngineError::from))))
}

impl Engine {
    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Opens (or creates) an engine over `dir`.
    ///
    /// Every `NNNNNN.sst` file in the directory is opened and assigned to
    /// the family named in its header. Leftover temporary files from an
    /// interrupted flush are removed.
    pub fn open(dir: impl AsRef<Path>, opts: EngineOptions) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let ctx = TableContext {
            cache: Arc::clone(opts.memory.cache()),
            table_cache: Arc::new(TableCache::new(opts.max_open_files)),
            io: Arc::new(IoCounters::default()),
        };

        let mut families: BTreeMap<String, ColumnFamily> = BTreeMap::new();
        let mut max_number = 0;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.to_str().is_some_and(|p| p.ends_with(".sst.tmp")) {
                debug!(path = %path.display(), "removing unfinished data file");
                fs::remove_file(&path)?;
                continue;
            }
            let Some(number) = sstable::parse_file_number(&path) else {
                continue;
            };
            let table = SSTable::open(&path, ctx.clone())?;
            max_number = max_number.max(number);
            families
                .entry(table.column_family().to_owned())
                .or_insert_with(|| ColumnFamily::new(opts.write_buffer_size))
                .tables
                .push(table);
        }
        for family in families.values_mut() {
            family.tables.sort_by_key(|t| Reverse(t.number()));
        }

        info!(
            dir = %dir.display(),
            families = families.len(),
            files = families.values().map(|f| f.tables.len()).sum::<usize>(),
            "engine opened"
        );

        Ok(Self {
            dir,
            opts,
            ctx,
            stats: EngineStats::default(),
            inner: RwLock::new(EngineInner {
                families,
                next_file_number: max_number + 1,
            }),
        })
    }

    /// Directory holding the data files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    // --------------------------------------------------------------------------------------------
    // Write helpers
    // --------------------------------------------------------------------------------------------

    fn account(&self, delta: isize) {
        if let Some(wbm) = self.opts.memory.write_buffers() {
            if delta >= 0 {
                wbm.reserve(delta.unsigned_abs());
            } else {
                wbm.free(delta.unsigned_abs());
            }
        }
    }

    /// Writes one entry into `cf`, freezing and flushing as needed.
    fn apply(
        &self,
        inner: &mut EngineInner,
        cf: &str,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<(), EngineError> {
        let EngineInner {
            families,
            next_file_number,
        } = &mut *inner;
        let family = families
            .entry(cf.to_owned())
            .or_insert_with(|| ColumnFamily::new(self.opts.write_buffer_size));

        let delta = match insert(&mut family.active, key, value) {
            Ok(delta) => delta,
            Err(MemtableError::FlushRequired) => {
                family.freeze(self.opts.write_buffer_size);
                if family.frozen.len() + 1 >= self.opts.max_write_buffer_number {
                    let started = Instant::now();
                    self.flush_family(cf, family, next_file_number)?;
                    self.stats.add_stall(started.elapsed());
                }
                insert(&mut family.active, key, value)?
            }
        };
        trace!(cf, key = %HexKey(key), tombstone = value.is_none(), "engine write");
        self.account(delta);

        if self
            .opts
            .memory
            .write_buffers()
            .is_some_and(|wbm| wbm.should_flush())
        {
            debug!(dir = %self.dir.display(), "write buffer budget exhausted, flushing");
            let started = Instant::now();
            self.flush_all(inner)?;
            self.stats.add_stall(started.elapsed());
        }
        Ok(())
    }

    fn lookup(inner: &EngineInner, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let Some(family) = inner.families.get(cf) else {
            return Ok(None);
        };

        for memtable in std::iter::once(&family.active).chain(&family.frozen) {
            match memtable.get(key) {
                Lookup::Value(v) => return Ok(Some(v)),
                Lookup::Deleted => return Ok(None),
                Lookup::Absent => {}
            }
        }
        for table in &family.tables {
            match table.get(key)? {
                Lookup::Value(v) => return Ok(Some(v)),
                Lookup::Deleted => return Ok(None),
                Lookup::Absent => {}
            }
        }
        Ok(None)
    }

    fn merge_inner(
        &self,
        inner: &mut EngineInner,
        cf: &str,
        key: &[u8],
        operand: &[u8],
    ) -> Result<(), EngineError> {
        let existing = Self::lookup(inner, cf, key)?;
        let merged = self.opts.merge_operator.merge(existing.as_deref(), operand);
        self.apply(inner, cf, key, Some(&merged))
    }

    // --------------------------------------------------------------------------------------------
    // Point operations
    // --------------------------------------------------------------------------------------------

    /// Latest live value of `key` in `cf`.
    pub fn get(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>, EngineError> {
        let started = Instant::now();
        let inner = self.inner.read();
        let result = Self::lookup(&inner, cf, key);
        self.stats.get.record(started.elapsed());
        result
    }

    /// Insert or overwrite `key` in `cf`. Unknown families are created.
    pub fn put(&self, cf: &str, key: &[u8], value: &[u8]) -> Result<(), EngineError> {
        let started = Instant::now();
        let mut inner = self.inner.write();
        self.apply(&mut inner, cf, key, Some(value))?;
        self.stats.put.record(started.elapsed());
        Ok(())
    }

    /// Delete `key` from `cf`.
    pub fn delete(&self, cf: &str, key: &[u8]) -> Result<(), EngineError> {
        let started = Instant::now();
        let mut inner = self.inner.write();
        self.apply(&mut inner, cf, key, None)?;
        self.stats.delete.record(started.elapsed());
        Ok(())
    }

    /// Merge `operand` into the current value of `key`.
    pub fn merge(&self, cf: &str, key: &[u8], operand: &[u8]) -> Result<(), EngineError> {
        let started = Instant::now();
        let mut inner = self.inner.write();
        self.merge_inner(&mut inner, cf, key, operand)?;
        self.stats.merge.record(started.elapsed());
        Ok(())
    }

    /// Applies every operation of `batch` in order under one lock.
    pub fn write(&self, batch: &WriteBatch) -> Result<(), EngineError> {
        let mut inner = self.inner.write();
        for op in batch.ops() {
            let started = Instant::now();
            match op {
                BatchOp::Put {
                    column_family,
                    key,
                    value,
                } => {
                    self.apply(&mut inner, column_family, key, Some(value))?;
                    self.stats.put.record(started.elapsed());
                }
                BatchOp::Delete { column_family, key } => {
                    self.apply(&mut inner, column_family, key, None)?;
                    self.stats.delete.record(started.elapsed());
                }
                BatchOp::Merge {
                    column_family,
                    key,
                    operand,
                } => {
                    self.merge_inner(&mut inner, column_family, key, operand)?;
                    self.stats.merge.record(started.elapsed());
                }
            }
        }
        debug!(ops = batch.len(), bytes = batch.size_bytes(), "write batch applied");
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Scans
    // --------------------------------------------------------------------------------------------

    /// Live key-value pairs of `cf` within the bounds, in key order.
    pub fn range(
        &self,
        cf: &str,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
    ) -> Result<LiveEntries, EngineError> {
        let inner = self.inner.read();
        let mut layers: Vec<LayerIter> = Vec::new();

        if let Some(family) = inner.families.get(cf) {
            layers.push(memtable_layer(&family.active, lower, upper));
            for frozen in &family.frozen {
                layers.push(memtable_layer(frozen, lower, upper));
            }
            for table in &family.tables {
                layers.push(table_layer(table, lower, owned_bound(upper))?);
            }
        }
        Ok(LiveEntries::new(MergeIterator::new(layers)))
    }

    /// Every live key-value pair of `cf`.
    pub fn iter(&self, cf: &str) -> Result<LiveEntries, EngineError> {
        self.range(cf, Bound::Unbounded, Bound::Unbounded)
    }

    /// Live pairs of `cf` whose key starts with `prefix`.
    pub fn prefix_scan(&self, cf: &str, prefix: &[u8]) -> Result<LiveEntries, EngineError> {
        let end = prefix_successor(prefix);
        let upper = match &end {
            Some(end) => Bound::Excluded(end.as_slice()),
            None => Bound::Unbounded,
        };
        self.range(cf, Bound::Included(prefix), upper)
    }

    /// Names of the families holding data or buffered writes.
    pub fn column_families(&self) -> Vec<String> {
        self.inner.read().families.keys().cloned().collect()
    }

    /// Estimated number of live keys across all families.
    ///
    /// Counts buffered entries plus data file entries minus tombstones, so
    /// keys overwritten in several layers are counted more than once.
    pub fn approximate_num_keys(&self) -> u64 {
        let inner = self.inner.read();
        inner
            .families
            .values()
            .map(|f| {
                let buffered = f.active.len() + f.frozen.iter().map(Memtable::len).sum::<usize>();
                let stored: u64 = f
                    .tables
                    .iter()
                    .map(|t| t.entry_count().saturating_sub(t.tombstone_count()))
                    .sum();
                buffered as u64 + stored
            })
            .sum()
    }

    // --------------------------------------------------------------------------------------------
    // Flush
    // --------------------------------------------------------------------------------------------

    /// Builds a data file for `cf` from what `fill` adds. Returns `None` when
    /// nothing was added.
    fn write_table(
        &self,
        cf: &str,
        expected_entries: usize,
        size_hint: u64,
        next_file_number: &mut u64,
        fill: impl FnOnce(&mut TableBuilder) -> Result<(), EngineError>,
    ) -> Result<Option<Arc<SSTable>>, EngineError> {
        let number = *next_file_number;
        *next_file_number += 1;

        let path = self.dir.join(sstable::file_name(number));
        let preallocate = self.opts.allow_fallocate.then_some(size_hint);
        let mut builder = TableBuilder::create(
            &path,
            cf,
            self.opts.compression,
            expected_entries,
            preallocate,
        )?;
        fill(&mut builder)?;
        if builder.entry_count() == 0 {
            return Ok(None);
        }
        let props = builder.finish(&self.ctx.io)?;
        Ok(Some(SSTable::open(&props.path, self.ctx.clone())?))
    }

    /// Flushes every frozen memtable of one family, oldest first.
    fn flush_family(
        &self,
        cf: &str,
        family: &mut ColumnFamily,
        next_file_number: &mut u64,
    ) -> Result<(), EngineError> {
        while let Some(memtable) = family.frozen.last() {
            let size = memtable.approximate_size();
            // Nothing older can be shadowed, so tombstones are dropped.
            let keep_tombstones = !family.tables.is_empty();

            let table = self.write_table(
                cf,
                memtable.len(),
                size as u64,
                next_file_number,
                |builder| {
                    for (key, value) in memtable.range(Bound::Unbounded, Bound::Unbounded) {
                        if value.is_some() || keep_tombstones {
                            builder.add(key, value)?;
                        }
                    }
                    Ok(())
                },
            )?;

            family.frozen.pop();
            if let Some(wbm) = self.opts.memory.write_buffers() {
                wbm.free(size);
            }
            if let Some(table) = table {
                self.stats
                    .flush_bytes
                    .fetch_add(table.file_size(), Ordering::Relaxed);
                debug!(
                    cf,
                    file = table.number(),
                    entries = table.entry_count(),
                    bytes = table.file_size(),
                    "memtable flushed"
                );
                family.tables.insert(0, table);
            }
        }
        Ok(())
    }

    fn flush_all(&self, inner: &mut EngineInner) -> Result<(), EngineError> {
        let EngineInner {
            families,
            next_file_number,
        } = inner;
        for (name, family) in families.iter_mut() {
            if !family.active.is_empty() {
                family.freeze(self.opts.write_buffer_size);
            }
            self.flush_family(name, family, next_file_number)?;
        }
        Ok(())
    }

    /// Flushes every memtable of every family into data files.
    pub fn flush(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.write();
        self.flush_all(&mut inner)
    }

    // --------------------------------------------------------------------------------------------
    // Compaction
    // --------------------------------------------------------------------------------------------

    /// Full compaction: flushes, then rewrites each family's data files into
    /// at most one file without tombstones.
    pub fn compact(&self) -> Result<(), EngineError> {
        let started = Instant::now();
        let mut inner = self.inner.write();
        self.flush_all(&mut inner)?;

        let EngineInner {
            families,
            next_file_number,
        } = &mut *inner;
        for (name, family) in families.iter_mut() {
            let needed = family.tables.len() > 1
                || family.tables.iter().any(|t| t.tombstone_count() > 0);
            if !needed {
                continue;
            }

            let bytes_read: u64 = family.tables.iter().map(|t| t.file_size()).sum();
            let expected = family
                .tables
                .iter()
                .map(|t| t.entry_count() as usize)
                .sum();
            let layers = family
                .tables
                .iter()
                .map(|t| table_layer(t, Bound::Unbounded, Bound::Unbounded))
                .collect::<Result<Vec<_>, _>>()?;
            let live = LiveEntries::new(MergeIterator::new(layers));

            let table = self.write_table(name, expected, bytes_read, next_file_number, |builder| {
                for item in live {
                    let (key, value) = item?;
                    builder.add(&key, Some(&value))?;
                }
                Ok(())
            })?;

            let bytes_written = table.as_ref().map_or(0, |t| t.file_size());
            let obsolete = mem::replace(&mut family.tables, table.into_iter().collect());
            self.stats
                .compaction_bytes_read
                .fetch_add(bytes_read, Ordering::Relaxed);
            self.stats
                .compaction_bytes_written
                .fetch_add(bytes_written, Ordering::Relaxed);

            let removed = obsolete.len();
            for table in obsolete {
                let path = table.path().to_path_buf();
                drop(table);
                if let Err(e) = fs::remove_file(&path)
                    && e.kind() != io::ErrorKind::NotFound
                {
                    warn!(path = %path.display(), "failed to remove compacted data file: {e}");
                }
            }
            info!(cf = %name, removed, bytes_read, bytes_written, "column family compacted");
        }

        self.stats.compaction.record(started.elapsed());
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Checkpoint
    // --------------------------------------------------------------------------------------------

    /// Flushes, then links (or copies) every live data file into `dest`.
    ///
    /// Returns the created paths in name order. `dest` is created if
    /// missing; same-named files already there are replaced.
    pub fn checkpoint(&self, dest: impl AsRef<Path>) -> Result<Vec<PathBuf>, EngineError> {
        let dest = dest.as_ref();
        let mut inner = self.inner.write();
        self.flush_all(&mut inner)?;
        fs::create_dir_all(dest)?;

        let mut files = Vec::new();
        for table in inner.families.values().flat_map(|f| f.tables.iter()) {
            let name = table
                .path()
                .file_name()
                .ok_or_else(|| EngineError::Internal("data file without a name".into()))?;
            let target = dest.join(name);
            if target.exists() {
                fs::remove_file(&target)?;
            }
            if let Err(e) = fs::hard_link(table.path(), &target) {
                trace!(path = %target.display(), "hard link failed ({e}), copying");
                fs::copy(table.path(), &target)?;
            }
            files.push(target);
        }
        if let Ok(d) = fs::File::open(dest) {
            d.sync_all()?;
        }
        files.sort();

        info!(dest = %dest.display(), files = files.len(), "engine checkpoint created");
        Ok(files)
    }

    // --------------------------------------------------------------------------------------------
    // Statistics
    // --------------------------------------------------------------------------------------------

    /// Returns a snapshot of engine statistics.
    pub fn metrics(&self) -> EngineMetrics {
        let inner = self.inner.read();
        let io = &self.ctx.io;
        let families = &inner.families;
        let tables = || families.values().flat_map(|f| f.tables.iter());

        EngineMetrics {
            get: self.stats.get.snapshot(),
            put: self.stats.put.snapshot(),
            merge: self.stats.merge.snapshot(),
            delete: self.stats.delete.snapshot(),
            compaction: self.stats.compaction.snapshot(),
            bytes_read: io.bytes_read.load(Ordering::Relaxed),
            bytes_written: io.bytes_written.load(Ordering::Relaxed),
            cache_hits: io.cache_hits.load(Ordering::Relaxed),
            cache_misses: io.cache_misses.load(Ordering::Relaxed),
            stall_micros: self.stats.stall_micros.load(Ordering::Relaxed),
            flush_bytes: self.stats.flush_bytes.load(Ordering::Relaxed),
            compaction_bytes_read: self.stats.compaction_bytes_read.load(Ordering::Relaxed),
            compaction_bytes_written: self.stats.compaction_bytes_written.load(Ordering::Relaxed),
            block_cache_usage: self.ctx.cache.usage(),
            memtable_bytes: families.values().map(ColumnFamily::memtable_bytes).sum(),
            live_files: tables().count(),
            live_file_bytes: tables().map(|t| t.file_size()).sum(),
            frozen_memtables: families.values().map(|f| f.frozen.len()).sum(),
        }
    }

    /// Zeroes every counter and histogram.
    pub fn reset_stats(&self) {
        self.stats.reset();
        self.ctx.io.reset();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let held: usize = self
            .inner
            .get_mut()
            .families
            .values()
            .map(ColumnFamily::memtable_bytes)
            .sum();
        if let Some(wbm) = self.opts.memory.write_buffers() {
            wbm.free(held);
        }
    }
}
