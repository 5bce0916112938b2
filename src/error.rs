//! Store-level error taxonomy.
//!
//! Module errors ([`EngineError`], [`ChangelogError`], [`FileManagerError`],
//! [`LeaseError`]) convert into [`StoreError`]. Conditions a caller is
//! expected to branch on surface as dedicated variants with structured
//! fields; everything else stays wrapped.

use std::{fmt, io};

use thiserror::Error;

use crate::changelog::ChangelogError;
use crate::engine::EngineError;
use crate::file_manager::FileManagerError;
use crate::lease::LeaseError;

/// Commit phase in which a durable write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStage {
    /// Applying the write batch to the engine.
    WriteBatch,
    /// Flushing memtables.
    Flush,
    /// Compacting the engine.
    Compaction,
    /// Capturing a local checkpoint.
    Checkpoint,
    /// Publishing the changelog.
    Changelog,
    /// Uploading checkpoint files and the manifest.
    FileSync,
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CommitStage::WriteBatch => "writeBatch",
            CommitStage::Flush => "flush",
            CommitStage::Compaction => "compaction",
            CommitStage::Checkpoint => "checkpoint",
            CommitStage::Changelog => "changelog",
            CommitStage::FileSync => "fileSync",
        };
        f.write_str(name)
    }
}

/// Discriminant of a [`StoreError`], for matching without destructuring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    VersionNotFound,
    CheckpointNotFound,
    UnsupportedCheckpointVersion,
    InstanceUnavailable,
    UnsupportedOperation,
    DurabilityFailure,
    InvalidConfiguration,
    Engine,
    Changelog,
    FileManager,
    Io,
}

/// Errors returned by the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Neither a snapshot nor a changelog chain reaches the requested version.
    #[error("version {version} of {identity} cannot be loaded (latest committed: {latest})")]
    VersionNotFound {
        /// Store the load was for.
        identity: String,
        /// Requested version.
        version: u64,
        /// Highest version found remotely.
        latest: u64,
    },

    /// A manifest required for a load is missing.
    #[error("checkpoint for version {version} not found at {path}")]
    CheckpointNotFound {
        /// Version whose manifest was expected.
        version: u64,
        /// Path that was probed.
        path: String,
    },

    /// A manifest has a header this build cannot read.
    #[error("unsupported checkpoint format: expected `{expected}`, found `{actual}`")]
    UnsupportedCheckpointVersion {
        /// Header this build writes.
        expected: String,
        /// Header that was found.
        actual: String,
    },

    /// Another session holds the store's lease.
    #[error(
        "store {identity} is held by `{holder}` on thread {holder_thread} for {held_ms} ms; \
         gave up after waiting {waited_ms} ms"
    )]
    InstanceUnavailable {
        /// Store whose lease was requested.
        identity: String,
        /// Name of the current holder.
        holder: String,
        /// Thread of the current holder.
        holder_thread: String,
        /// How long the holder has had the lease.
        held_ms: u64,
        /// How long this caller waited.
        waited_ms: u64,
        /// Where the holder acquired the lease.
        holder_backtrace: String,
    },

    /// The operation is not allowed in the current mode.
    #[error("unsupported operation `{operation}`: {reason}")]
    UnsupportedOperation {
        /// Operation that was attempted.
        operation: String,
        /// Why it is rejected.
        reason: String,
    },

    /// Committing a version failed; local state was restored to the last
    /// loaded version.
    #[error("failed to durably commit version {version} during {stage}: {source}")]
    DurabilityFailure {
        /// Version that was being committed.
        version: u64,
        /// Phase that failed.
        stage: CommitStage,
        /// Underlying failure.
        source: Box<StoreError>,
    },

    /// A configuration option failed to parse or is out of range.
    #[error("invalid configuration `{option}` = `{value}`: {reason}")]
    InvalidConfiguration {
        /// Option name.
        option: String,
        /// Offending value.
        value: String,
        /// Constraint that was violated.
        reason: String,
    },

    /// Local engine failure.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Changelog failure.
    #[error("changelog error: {0}")]
    Changelog(#[from] ChangelogError),

    /// Remote file manager failure.
    #[error("file manager error: {0}")]
    FileManager(FileManagerError),

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl StoreError {
    pub(crate) fn unsupported(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::UnsupportedOperation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_config(
        option: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        StoreError::InvalidConfiguration {
            option: option.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::VersionNotFound { .. } => ErrorKind::VersionNotFound,
            StoreError::CheckpointNotFound { .. } => ErrorKind::CheckpointNotFound,
            StoreError::UnsupportedCheckpointVersion { .. } => {
                ErrorKind::UnsupportedCheckpointVersion
            }
            StoreError::InstanceUnavailable { .. } => ErrorKind::InstanceUnavailable,
            StoreError::UnsupportedOperation { .. } => ErrorKind::UnsupportedOperation,
            StoreError::DurabilityFailure { .. } => ErrorKind::DurabilityFailure,
            StoreError::InvalidConfiguration { .. } => ErrorKind::InvalidConfiguration,
            StoreError::Engine(_) => ErrorKind::Engine,
            StoreError::Changelog(_) => ErrorKind::Changelog,
            StoreError::FileManager(_) => ErrorKind::FileManager,
            StoreError::Io(_) => ErrorKind::Io,
        }
    }

    /// Structured payload as name/value pairs.
    pub fn parameters(&self) -> Vec<(&'static str, String)> {
        match self {
            StoreError::VersionNotFound {
                identity,
                version,
                latest,
            } => vec![
                ("identity", identity.clone()),
                ("version", version.to_string()),
                ("latest", latest.to_string()),
            ],
            StoreError::CheckpointNotFound { version, path } => vec![
                ("version", version.to_string()),
                ("path", path.clone()),
            ],
            StoreError::UnsupportedCheckpointVersion { expected, actual } => vec![
                ("expected", expected.clone()),
                ("actual", actual.clone()),
            ],
            StoreError::InstanceUnavailable {
                identity,
                holder,
                holder_thread,
                held_ms,
                waited_ms,
                holder_backtrace,
            } => vec![
                ("identity", identity.clone()),
                ("holder", holder.clone()),
                ("holderThread", holder_thread.clone()),
                ("heldMs", held_ms.to_string()),
                ("waitedMs", waited_ms.to_string()),
                ("holderBacktrace", holder_backtrace.clone()),
            ],
            StoreError::UnsupportedOperation { operation, reason } => vec![
                ("operation", operation.clone()),
                ("reason", reason.clone()),
            ],
            StoreError::DurabilityFailure {
                version,
                stage,
                source,
            } => vec![
                ("version", version.to_string()),
                ("stage", stage.to_string()),
                ("cause", source.to_string()),
            ],
            StoreError::InvalidConfiguration {
                option,
                value,
                reason,
            } => vec![
                ("option", option.clone()),
                ("value", value.clone()),
                ("reason", reason.clone()),
            ],
            StoreError::Engine(e) => vec![("message", e.to_string())],
            StoreError::Changelog(e) => vec![("message", e.to_string())],
            StoreError::FileManager(e) => vec![("message", e.to_string())],
            StoreError::Io(e) => vec![("message", e.to_string())],
        }
    }
}

impl From<FileManagerError> for StoreError {
    fn from(e: FileManagerError) -> Self {
        match e {
            FileManagerError::CheckpointNotFound { version, path } => {
                StoreError::CheckpointNotFound {
                    version,
                    path: path.display().to_string(),
                }
            }
            FileManagerError::UnsupportedCheckpointVersion { expected, actual } => {
                StoreError::UnsupportedCheckpointVersion {
                    expected: expected.to_string(),
                    actual,
                }
            }
            other => StoreError::FileManager(other),
        }
    }
}

impl From<LeaseError> for StoreError {
    fn from(e: LeaseError) -> Self {
        match e {
            LeaseError::Unavailable(conflict) => StoreError::InstanceUnavailable {
                identity: conflict.identity,
                holder: conflict.holder,
                holder_thread: conflict.holder_thread,
                held_ms: conflict.held_for.as_millis() as u64,
                waited_ms: conflict.waited.as_millis() as u64,
                holder_backtrace: conflict.holder_backtrace,
            },
        }
    }
}
