//! Data file construction.
//!
//! [`TableBuilder`] consumes entries in strictly ascending key order and
//! writes them into a temporary file next to the destination. [`finish`]
//! appends the bloom, index and footer blocks, syncs, and renames the file
//! into place, so a data file is either complete or absent.
//!
//! [`finish`]: TableBuilder::finish

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    mem,
    path::{Path, PathBuf},
    sync::atomic::Ordering,
};

use bloomfilter::Bloom;
use tracing::{debug, warn};

use crate::config::CompressionCodec;
use crate::encoding::{self, Encode};
use crate::fs::discard_file;

use super::{
    BlockHandle, DataBlock, Footer, IndexEntry, IoCounters, SST_BLOOM_FALSE_POSITIVE_RATE,
    SST_DATA_BLOCK_TARGET_SIZE, SST_FORMAT_VERSION, SST_HDR_MAGIC, SSTableError,
};

/// Zstd level used for compressed data blocks.
const ZSTD_LEVEL: i32 = 3;

/// Summary of a finished data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableProperties {
    /// Final path.
    pub path: PathBuf,
    /// Bytes on disk.
    pub file_size: u64,
    /// Entries written, tombstones included.
    pub entry_count: u64,
    /// Tombstones written.
    pub tombstone_count: u64,
}

/// Streams sorted entries into a new data file.
pub struct TableBuilder {
    final_path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    codec: CompressionCodec,
    offset: u64,
    bloom: Bloom<Vec<u8>>,
    block: Vec<u8>,
    block_last_key: Option<Vec<u8>>,
    index: Vec<IndexEntry>,
    entry_count: u64,
    tombstone_count: u64,
    preallocated: bool,
}

impl TableBuilder {
    /// Start a data file for `column_family` at `path`.
    ///
    /// `expected_entries` sizes the bloom filter. With `preallocate` set, the
    /// file's length is reserved up front and trimmed on finish.
    pub fn create(
        path: impl AsRef<Path>,
        column_family: &str,
        codec: CompressionCodec,
        expected_entries: usize,
        preallocate: Option<u64>,
    ) -> Result<Self, SSTableError> {
        let final_path = path.as_ref().to_path_buf();
        let tmp_path = final_path.with_extension("sst.tmp");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        if let Some(bytes) = preallocate.filter(|b| *b > 0) {
            file.set_len(bytes)?;
        }

        let bloom = Bloom::new_for_fp_rate(expected_entries.max(1), SST_BLOOM_FALSE_POSITIVE_RATE)
            .map_err(|e| SSTableError::Internal(e.to_string()))?;

        let mut builder = Self {
            final_path,
            tmp_path,
            writer: Some(BufWriter::new(file)),
            codec,
            offset: 0,
            bloom,
            block: Vec::with_capacity(SST_DATA_BLOCK_TARGET_SIZE * 2),
            block_last_key: None,
            index: Vec::new(),
            entry_count: 0,
            tombstone_count: 0,
            preallocated: preallocate.is_some_and(|b| b > 0),
        };

        let mut header = Vec::new();
        SST_HDR_MAGIC.encode_to(&mut header)?;
        SST_FORMAT_VERSION.encode_to(&mut header)?;
        column_family.encode_to(&mut header)?;
        codec.tag().encode_to(&mut header)?;
        builder.write_frame(&header)?;
        Ok(builder)
    }

    fn write_frame(&mut self, payload: &[u8]) -> Result<BlockHandle, SSTableError> {
        let mut framed = Vec::with_capacity(payload.len() + 8);
        encoding::write_frame(payload, &mut framed)?;
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SSTableError::Internal("builder already finished".into()))?;
        writer.write_all(&framed)?;

        let handle = BlockHandle {
            offset: self.offset,
            size: framed.len() as u64,
        };
        self.offset += framed.len() as u64;
        Ok(handle)
    }

    fn flush_block(&mut self) -> Result<(), SSTableError> {
        let Some(last_key) = self.block_last_key.take() else {
            return Ok(());
        };
        let raw = mem::take(&mut self.block);
        let payload = match self.codec {
            CompressionCodec::Uncompressed => raw,
            CompressionCodec::Zstd => zstd::encode_all(raw.as_slice(), ZSTD_LEVEL)?,
        };
        let handle = self.write_frame(&payload)?;
        self.index.push(IndexEntry { last_key, handle });
        Ok(())
    }

    /// Append one entry. `None` writes a tombstone.
    ///
    /// Keys must be strictly ascending.
    pub fn add(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<(), SSTableError> {
        let previous = self
            .block_last_key
            .as_deref()
            .or_else(|| self.index.last().map(|e| e.last_key.as_slice()));
        if previous.is_some_and(|p| p >= key) {
            return Err(SSTableError::OutOfOrder);
        }

        DataBlock::encode_cell(key, value, &mut self.block)?;
        self.bloom.set(&key.to_vec());
        self.block_last_key = Some(key.to_vec());
        self.entry_count += 1;
        if value.is_none() {
            self.tombstone_count += 1;
        }

        if self.block.len() >= SST_DATA_BLOCK_TARGET_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Number of entries added so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    fn publish(
        &self,
        mut writer: BufWriter<File>,
        footer: &[u8],
        file_size: u64,
    ) -> Result<(), SSTableError> {
        writer.write_all(footer)?;
        let file = writer
            .into_inner()
            .map_err(|e| SSTableError::Io(e.into_error()))?;
        if self.preallocated {
            file.set_len(file_size)?;
        }
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(())
    }

    /// Write trailing blocks, sync and publish the file.
    pub fn finish(mut self, io: &IoCounters) -> Result<TableProperties, SSTableError> {
        if self.entry_count == 0 {
            return Err(SSTableError::Empty);
        }
        self.flush_block()?;

        let bloom_bytes = self.bloom.as_slice().to_vec();
        let bloom = self.write_frame(&bloom_bytes)?;

        let mut index_bytes = Vec::new();
        encoding::encode_vec(&self.index, &mut index_bytes)?;
        let index = self.write_frame(&index_bytes)?;

        let footer = Footer {
            bloom,
            index,
            entry_count: self.entry_count,
            tombstone_count: self.tombstone_count,
        }
        .to_bytes()?;

        let writer = self
            .writer
            .take()
            .ok_or_else(|| SSTableError::Internal("builder already finished".into()))?;
        let file_size = self.offset + footer.len() as u64;
        if let Err(e) = self.publish(writer, &footer, file_size) {
            discard_file(&self.tmp_path);
            return Err(e);
        }
        io.bytes_written.fetch_add(file_size, Ordering::Relaxed);

        debug!(
            path = %self.final_path.display(),
            entries = self.entry_count,
            tombstones = self.tombstone_count,
            file_size,
            "data file written"
        );
        Ok(TableProperties {
            path: self.final_path.clone(),
            file_size,
            entry_count: self.entry_count,
            tombstone_count: self.tombstone_count,
        })
    }
}

impl Drop for TableBuilder {
    fn drop(&mut self) {
        if self.writer.take().is_some()
            && let Err(e) = fs::remove_file(&self.tmp_path)
        {
            warn!(path = %self.tmp_path.display(), "failed to remove abandoned data file: {e}");
        }
    }
}
