//! Changelog Module
//!
//! A changelog file records, in order, every mutation applied between loading
//! version `v - 1` and committing version `v`. Replaying it on top of the
//! state of `v - 1` reproduces `v` without a full snapshot.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER_LEN_LE][MAGIC "SCLG" | FORMAT_LE][HEADER_CRC32_LE]
//! [REC_LEN_LE][REC_BYTES][REC_CRC32_LE]
//! ...
//! [END_MARKER = 0xFFFF_FFFF]
//! ```
//!
//! Every frame's checksum covers `len || bytes`. The end marker is written by
//! [`ChangelogWriter::commit`]; a file without it is truncated and is
//! rejected by [`ChangelogReader`].
//!
//! # Formats
//!
//! | Format        | Record payload                                     |
//! |---------------|----------------------------------------------------|
//! | `Legacy`      | `[u8 kind][key][value if PUT]`                     |
//! | `MultiFamily` | `[u8 kind][column family][key][value if PUT/MERGE]`|
//!
//! The legacy format predates column families. Its writer rejects merges
//! and non-default families; its reader reports every record against
//! [`DEFAULT_COLUMN_FAMILY`].
//!
//! # Publication
//!
//! Records stream into a [`CheckpointFs`] atomic output. Nothing is visible
//! at the final path until `commit`, which is the commit point of a version
//! in changelog checkpointing mode.

#[cfg(test)]
mod tests;

use std::{
    fmt,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::encoding::{self, Encode, EncodingError, FRAME_WORD, Reader};
use crate::fs::{AtomicOutput, CheckpointFs};

/// Name of the column family every store has.
pub const DEFAULT_COLUMN_FAMILY: &str = "default";

const MAGIC: [u8; 4] = *b"SCLG";
const END_MARKER: u32 = u32::MAX;
const FLUSH_THRESHOLD: usize = 64 * 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by changelog operations.
#[derive(Debug, Error)]
pub enum ChangelogError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// The operation is not supported by this writer's format or state.
    #[error("unsupported changelog operation `{operation}`: {reason}")]
    UnsupportedOperation {
        /// Operation that was attempted.
        operation: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Header failed validation.
    #[error("invalid changelog header: {0}")]
    InvalidHeader(String),

    /// Record checksum mismatch.
    #[error("changelog record checksum mismatch")]
    ChecksumMismatch,

    /// The file ended before the end marker.
    #[error("changelog truncated before end marker")]
    UnexpectedEof,

    /// An earlier write failed and the changelog was discarded. The writer
    /// stays unusable so no version is published with missing records.
    #[error("changelog {path} was discarded after a failed write: {reason}")]
    Failed {
        /// Destination of the discarded changelog.
        path: PathBuf,
        /// The write error that discarded it.
        reason: String,
    },
}

// ------------------------------------------------------------------------------------------------
// Records
// ------------------------------------------------------------------------------------------------

/// Kind of mutation a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Insert or overwrite.
    Put,
    /// Remove the key.
    Delete,
    /// Combine the operand with the existing value through the merge operator.
    Merge,
}

impl RecordKind {
    fn tag(self) -> u8 {
        match self {
            RecordKind::Put => 0,
            RecordKind::Delete => 1,
            RecordKind::Merge => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, EncodingError> {
        match tag {
            0 => Ok(RecordKind::Put),
            1 => Ok(RecordKind::Delete),
            2 => Ok(RecordKind::Merge),
            other => Err(EncodingError::InvalidTag {
                tag: u32::from(other),
                type_name: "RecordKind",
            }),
        }
    }

    fn has_value(self) -> bool {
        !matches!(self, RecordKind::Delete)
    }
}

/// One mutation in a changelog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogRecord {
    /// Mutation kind.
    pub kind: RecordKind,
    /// User key.
    pub key: Vec<u8>,
    /// Value for puts, operand for merges, `None` for deletes.
    pub value: Option<Vec<u8>>,
    /// Column family the mutation applies to.
    pub column_family: String,
}

impl ChangelogRecord {
    /// A put record.
    pub fn put(key: &[u8], value: &[u8], column_family: &str) -> Self {
        Self {
            kind: RecordKind::Put,
            key: key.to_vec(),
            value: Some(value.to_vec()),
            column_family: column_family.to_string(),
        }
    }

    /// A delete record.
    pub fn delete(key: &[u8], column_family: &str) -> Self {
        Self {
            kind: RecordKind::Delete,
            key: key.to_vec(),
            value: None,
            column_family: column_family.to_string(),
        }
    }

    /// A merge record.
    pub fn merge(key: &[u8], operand: &[u8], column_family: &str) -> Self {
        Self {
            kind: RecordKind::Merge,
            key: key.to_vec(),
            value: Some(operand.to_vec()),
            column_family: column_family.to_string(),
        }
    }
}

/// Changelog format version, chosen when the writer is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangelogFormat {
    /// Version 1: single default family, no merges.
    Legacy,
    /// Version 2: column-family tagged records, merges allowed.
    MultiFamily,
}

impl ChangelogFormat {
    fn number(self) -> u32 {
        match self {
            ChangelogFormat::Legacy => 1,
            ChangelogFormat::MultiFamily => 2,
        }
    }

    fn from_number(n: u32) -> Result<Self, ChangelogError> {
        match n {
            1 => Ok(ChangelogFormat::Legacy),
            2 => Ok(ChangelogFormat::MultiFamily),
            other => Err(ChangelogError::InvalidHeader(format!(
                "unsupported changelog format {other}"
            ))),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// RecordSink: framed and buffered atomic output
// ------------------------------------------------------------------------------------------------

struct RecordSink {
    out: Option<Box<dyn AtomicOutput>>,
    path: PathBuf,
    pending: Vec<u8>,
    /// Size of the published file, end marker included.
    bytes_written: u64,
    records: u64,
    failure: Option<String>,
}

impl RecordSink {
    fn open(
        fs: &dyn CheckpointFs,
        path: &Path,
        format: ChangelogFormat,
    ) -> Result<Self, ChangelogError> {
        let out = fs.create_atomic(path, true)?;

        let mut header = Vec::with_capacity(8);
        MAGIC.encode_to(&mut header)?;
        format.number().encode_to(&mut header)?;

        let mut pending = Vec::with_capacity(FLUSH_THRESHOLD);
        encoding::write_frame(&header, &mut pending)?;

        Ok(Self {
            out: Some(out),
            path: path.to_path_buf(),
            bytes_written: (pending.len() + FRAME_WORD) as u64,
            pending,
            records: 0,
            failure: None,
        })
    }

    fn output(
        &mut self,
        operation: &'static str,
    ) -> Result<&mut Box<dyn AtomicOutput>, ChangelogError> {
        if let Some(reason) = &self.failure {
            return Err(ChangelogError::Failed {
                path: self.path.clone(),
                reason: reason.clone(),
            });
        }
        self.out
            .as_mut()
            .ok_or_else(|| ChangelogError::UnsupportedOperation {
                operation,
                reason: format!("changelog {} is already finalized", self.path.display()),
            })
    }

    fn append(&mut self, operation: &'static str, payload: &[u8]) -> Result<(), ChangelogError> {
        self.output(operation)?;
        let before = self.pending.len();
        encoding::write_frame(payload, &mut self.pending)?;
        self.bytes_written += (self.pending.len() - before) as u64;
        self.records += 1;

        if self.pending.len() >= FLUSH_THRESHOLD {
            let chunk = std::mem::take(&mut self.pending);
            let written = self.output(operation)?.write_all(&chunk);
            if let Err(e) = written {
                self.fail(&e);
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Discards the output after a write error. Every later append and the
    /// commit return [`ChangelogError::Failed`].
    fn fail(&mut self, err: &io::Error) {
        warn!(path = %self.path.display(), "changelog write failed, discarding: {err}");
        self.pending.clear();
        self.failure = Some(err.to_string());
        if let Some(out) = self.out.take()
            && let Err(e) = out.cancel()
        {
            warn!(path = %self.path.display(), "failed to discard changelog: {e}");
        }
    }

    fn commit(&mut self) -> Result<(), ChangelogError> {
        self.output("commit")?;
        self.pending.extend_from_slice(&END_MARKER.to_le_bytes());

        let chunk = std::mem::take(&mut self.pending);
        let mut out = self.out.take().ok_or_else(|| ChangelogError::UnsupportedOperation {
            operation: "commit",
            reason: "changelog already finalized".into(),
        })?;
        if let Err(e) = out.write_all(&chunk).and_then(|_| out.flush()) {
            self.failure = Some(e.to_string());
            if let Err(cancel_err) = out.cancel() {
                warn!(path = %self.path.display(), "failed to discard changelog: {cancel_err}");
            }
            return Err(e.into());
        }
        out.commit()?;

        debug!(
            path = %self.path.display(),
            records = self.records,
            bytes = self.bytes_written,
            "changelog committed"
        );
        Ok(())
    }

    fn abort(&mut self) {
        self.pending.clear();
        if let Some(out) = self.out.take() {
            if let Err(e) = out.cancel() {
                warn!(path = %self.path.display(), "failed to discard changelog: {e}");
            } else {
                debug!(path = %self.path.display(), "changelog aborted");
            }
        }
    }
}

impl fmt::Debug for RecordSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordSink")
            .field("path", &self.path)
            .field("finalized", &self.out.is_none())
            .field("failed", &self.failure.is_some())
            .field("records", &self.records)
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------
// Writers
// ------------------------------------------------------------------------------------------------

/// Writer for the single-family format. Kept for stores created before
/// column families were enabled.
#[derive(Debug)]
pub struct LegacyWriter {
    sink: RecordSink,
}

impl LegacyWriter {
    fn append(&mut self, record: &ChangelogRecord) -> Result<(), ChangelogError> {
        let operation = match record.kind {
            RecordKind::Put => "put",
            RecordKind::Delete => "delete",
            RecordKind::Merge => {
                return Err(ChangelogError::UnsupportedOperation {
                    operation: "merge",
                    reason: "the legacy changelog format has no merge records".into(),
                });
            }
        };
        if record.column_family != DEFAULT_COLUMN_FAMILY {
            return Err(ChangelogError::UnsupportedOperation {
                operation,
                reason: format!(
                    "the legacy changelog format only records the `{DEFAULT_COLUMN_FAMILY}` family, got `{}`",
                    record.column_family
                ),
            });
        }

        let mut payload = Vec::with_capacity(16 + record.key.len());
        record.kind.tag().encode_to(&mut payload)?;
        record.key.encode_to(&mut payload)?;
        if let Some(value) = &record.value {
            value.encode_to(&mut payload)?;
        }
        self.sink.append(operation, &payload)
    }
}

/// Writer for the column-family tagged format.
#[derive(Debug)]
pub struct MultiFamilyWriter {
    sink: RecordSink,
}

impl MultiFamilyWriter {
    fn append(&mut self, record: &ChangelogRecord) -> Result<(), ChangelogError> {
        let operation = match record.kind {
            RecordKind::Put => "put",
            RecordKind::Delete => "delete",
            RecordKind::Merge => "merge",
        };
        let mut payload =
            Vec::with_capacity(16 + record.key.len() + record.column_family.len());
        record.kind.tag().encode_to(&mut payload)?;
        record.column_family.encode_to(&mut payload)?;
        record.key.encode_to(&mut payload)?;
        if let Some(value) = &record.value {
            value.encode_to(&mut payload)?;
        }
        self.sink.append(operation, &payload)
    }
}

/// Append-only changelog writer, one variant per on-disk format.
#[derive(Debug)]
pub enum ChangelogWriter {
    /// Format 1.
    Legacy(LegacyWriter),
    /// Format 2.
    MultiFamily(MultiFamilyWriter),
}

impl ChangelogWriter {
    /// Start a changelog at `path` in the given format.
    ///
    /// An existing changelog at `path` is replaced on commit, which is what
    /// re-executing a version needs.
    pub fn create(
        fs: &dyn CheckpointFs,
        path: &Path,
        format: ChangelogFormat,
    ) -> Result<Self, ChangelogError> {
        let sink = RecordSink::open(fs, path, format)?;
        trace!(path = %path.display(), ?format, "changelog writer opened");
        Ok(match format {
            ChangelogFormat::Legacy => ChangelogWriter::Legacy(LegacyWriter { sink }),
            ChangelogFormat::MultiFamily => {
                ChangelogWriter::MultiFamily(MultiFamilyWriter { sink })
            }
        })
    }

    /// Record a put.
    pub fn put(
        &mut self,
        key: &[u8],
        value: &[u8],
        column_family: &str,
    ) -> Result<(), ChangelogError> {
        self.append(&ChangelogRecord::put(key, value, column_family))
    }

    /// Record a delete.
    pub fn delete(&mut self, key: &[u8], column_family: &str) -> Result<(), ChangelogError> {
        self.append(&ChangelogRecord::delete(key, column_family))
    }

    /// Record a merge operand.
    pub fn merge(
        &mut self,
        key: &[u8],
        operand: &[u8],
        column_family: &str,
    ) -> Result<(), ChangelogError> {
        self.append(&ChangelogRecord::merge(key, operand, column_family))
    }

    /// Append an already-built record.
    pub fn append(&mut self, record: &ChangelogRecord) -> Result<(), ChangelogError> {
        match self {
            ChangelogWriter::Legacy(w) => w.append(record),
            ChangelogWriter::MultiFamily(w) => w.append(record),
        }
    }

    /// Finalize and publish the changelog. The writer accepts no further
    /// records afterwards.
    pub fn commit(&mut self) -> Result<(), ChangelogError> {
        self.sink_mut().commit()
    }

    /// Discard everything written so far. Idempotent.
    pub fn abort(&mut self) {
        self.sink_mut().abort();
    }

    /// Format this writer produces.
    pub fn format(&self) -> ChangelogFormat {
        match self {
            ChangelogWriter::Legacy(_) => ChangelogFormat::Legacy,
            ChangelogWriter::MultiFamily(_) => ChangelogFormat::MultiFamily,
        }
    }

    /// Whether a write failed and discarded this changelog.
    pub fn is_failed(&self) -> bool {
        self.sink().failure.is_some()
    }

    /// Whether `commit` or `abort` has been called, or a write failure
    /// discarded the changelog.
    pub fn is_finalized(&self) -> bool {
        self.sink().out.is_none()
    }

    /// Size the published file will have if committed now, framing and end
    /// marker included.
    pub fn bytes_written(&self) -> u64 {
        self.sink().bytes_written
    }

    /// Number of records appended.
    pub fn records(&self) -> u64 {
        self.sink().records
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.sink().path
    }

    fn sink(&self) -> &RecordSink {
        match self {
            ChangelogWriter::Legacy(w) => &w.sink,
            ChangelogWriter::MultiFamily(w) => &w.sink,
        }
    }

    fn sink_mut(&mut self) -> &mut RecordSink {
        match self {
            ChangelogWriter::Legacy(w) => &mut w.sink,
            ChangelogWriter::MultiFamily(w) => &mut w.sink,
        }
    }
}

impl Drop for ChangelogWriter {
    fn drop(&mut self) {
        if !self.is_finalized() {
            self.abort();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Streaming reader over a committed changelog.
///
/// Yields records in the order they were written. Each reader starts at the
/// beginning of the file; open a new one to re-read.
pub struct ChangelogReader {
    input: Box<dyn Read + Send>,
    format: ChangelogFormat,
    path: PathBuf,
    done: bool,
}

impl fmt::Debug for ChangelogReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangelogReader")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("done", &self.done)
            .finish()
    }
}

/// Read exactly `buf.len()` bytes, mapping a clean or partial EOF to
/// [`ChangelogError::UnexpectedEof`].
fn read_full(input: &mut dyn Read, buf: &mut [u8]) -> Result<(), ChangelogError> {
    match input.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(ChangelogError::UnexpectedEof),
        Err(e) => Err(e.into()),
    }
}

/// Read one frame whose length prefix has already been consumed.
fn read_frame_body(
    input: &mut dyn Read,
    len_le: [u8; 4],
) -> Result<Vec<u8>, ChangelogError> {
    let len = u32::from_le_bytes(len_le);
    if len > encoding::MAX_BYTE_LEN {
        return Err(EncodingError::LengthOverflow(format!(
            "changelog record length {len} exceeds MAX_BYTE_LEN"
        ))
        .into());
    }
    let mut payload = vec![0u8; len as usize];
    read_full(input, &mut payload)?;

    let mut crc = [0u8; FRAME_WORD];
    read_full(input, &mut crc)?;
    if u32::from_le_bytes(crc) != encoding::frame_checksum(len_le, &payload) {
        return Err(ChangelogError::ChecksumMismatch);
    }
    Ok(payload)
}

impl ChangelogReader {
    /// Open the changelog at `path` and validate its header.
    pub fn open(fs: &dyn CheckpointFs, path: &Path) -> Result<Self, ChangelogError> {
        let mut input = fs.open(path)?;

        let mut len_le = [0u8; FRAME_WORD];
        read_full(&mut *input, &mut len_le)?;
        let header = read_frame_body(&mut *input, len_le)?;

        let mut reader = Reader::new(&header);
        let magic: [u8; 4] = reader.read()?;
        if magic != MAGIC {
            return Err(ChangelogError::InvalidHeader("bad magic".into()));
        }
        let format = ChangelogFormat::from_number(reader.read::<u32>()?)?;

        trace!(path = %path.display(), ?format, "changelog reader opened");
        Ok(Self {
            input,
            format,
            path: path.to_path_buf(),
            done: false,
        })
    }

    /// Format recorded in the header.
    pub fn format(&self) -> ChangelogFormat {
        self.format
    }

    fn decode(&self, payload: &[u8]) -> Result<ChangelogRecord, ChangelogError> {
        let mut reader = Reader::new(payload);
        let kind = RecordKind::from_tag(reader.read::<u8>()?)?;

        let column_family = match self.format {
            ChangelogFormat::Legacy => {
                if kind == RecordKind::Merge {
                    return Err(ChangelogError::InvalidHeader(
                        "merge record in a legacy changelog".into(),
                    ));
                }
                DEFAULT_COLUMN_FAMILY.to_string()
            }
            ChangelogFormat::MultiFamily => reader.read::<String>()?,
        };
        let key = reader.read::<Vec<u8>>()?;
        let value = if kind.has_value() {
            Some(reader.read::<Vec<u8>>()?)
        } else {
            None
        };

        Ok(ChangelogRecord {
            kind,
            key,
            value,
            column_family,
        })
    }

    fn next_record(&mut self) -> Result<Option<ChangelogRecord>, ChangelogError> {
        let mut len_le = [0u8; FRAME_WORD];
        read_full(&mut *self.input, &mut len_le)?;
        if u32::from_le_bytes(len_le) == END_MARKER {
            return Ok(None);
        }
        let payload = read_frame_body(&mut *self.input, len_le)?;
        self.decode(&payload).map(Some)
    }
}

impl Iterator for ChangelogReader {
    type Item = Result<ChangelogRecord, ChangelogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                warn!(path = %self.path.display(), "changelog read failed: {e}");
                Some(Err(e))
            }
        }
    }
}
