//! # Versioned State Store
//!
//! A durable, versioned key-value state store for streaming operators,
//! built on an embedded **Log-Structured Merge Tree (LSM-tree)** engine.
//! Every commit produces a new version, and any retained version can be
//! reloaded, on this instance or on another one sharing the same
//! checkpoint root.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use versioned_state_store::{LocalCheckpointFs, StoreConfig, StoreIdentity, VersionedStore};
//!
//! let config = StoreConfig {
//!     changelog_checkpointing: true,
//!     min_deltas_for_snapshot: 5,
//!     ..StoreConfig::default()
//! };
//! let store = VersionedStore::open(
//!     StoreIdentity::new(0, 0, "counts"),
//!     "/tmp/counts/local",
//!     Arc::new(LocalCheckpointFs::new()),
//!     "/tmp/counts/checkpoints",
//!     config,
//! )
//! .unwrap();
//!
//! // Version 1
//! let mut session = store.load(0).unwrap();
//! session.put(b"apples", b"3").unwrap();
//! session.put(b"pears", b"1").unwrap();
//! assert_eq!(session.commit().unwrap(), 1);
//!
//! // Version 2
//! let mut session = store.load(1).unwrap();
//! session.delete(b"pears").unwrap();
//! assert_eq!(session.commit().unwrap(), 2);
//!
//! // Any retained version can be read back.
//! let session = store.load_read_only(1).unwrap();
//! assert_eq!(session.get(b"pears").unwrap(), Some(b"1".to_vec()));
//! session.rollback();
//!
//! // Upload pending snapshots and purge versions outside retention.
//! store.do_maintenance();
//! store.close().unwrap();
//! ```
//!
//! ## Features
//!
//! - **Changelog checkpointing**: each commit publishes only the mutations
//!   of that version; full snapshots are taken periodically.
//! - **Content-addressed uploads**: data files are uploaded once and shared
//!   by every snapshot that contains them.
//! - **Retention**: old snapshots, changelogs and unreferenced files are
//!   purged while the newest versions stay loadable.
//! - **Single writer**: one session per store at a time, with diagnostics
//!   naming the current holder on timeout.
//! - **Column families and merge**: optional named key spaces and a
//!   string-append merge operator.
//! - **Bounded memory**: a block cache and write buffer budget shared by
//!   every store configured with the same limits.

pub mod changelog;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod file_manager;
pub mod fs;
pub mod lease;
pub mod memory;
pub mod memtable;
pub mod metrics;
pub mod sstable;
pub mod store;

pub use changelog::{ChangelogFormat, DEFAULT_COLUMN_FAMILY};
pub use config::{CompressionCodec, DedupPolicy, StoreConfig};
pub use error::{CommitStage, ErrorKind, StoreError};
pub use file_manager::{FileManager, PurgeReport, SaveReport};
pub use fs::{AtomicOutput, CheckpointFs, FileStatus, LocalCheckpointFs};
pub use metrics::{CommitTimings, StoreMetrics};
pub use store::{
    MaintenanceHandle, MaintenanceReport, ScanIter, Session, StoreIdentity, VersionedStore,
};
