//! # Versioned Store
//!
//! [`VersionedStore`] is one logical store instance: a local [`Engine`]
//! holding the working state plus a [`FileManager`] holding every committed
//! version remotely.
//!
//! ## Versions
//!
//! Version `v` is materialized either as a snapshot (`<v>.manifest` plus the
//! data files it names) or as the newest snapshot `s < v` followed by the
//! changelogs `s+1..=v`. Version 0 is the empty store.
//!
//! ## Sessions
//!
//! [`VersionedStore::load`] takes the store's lease and returns a
//! [`Session`] positioned at the requested version. Reads and writes exist
//! only on the session, so they cannot happen without the lease. Writes go
//! to an in-memory batch layered over the engine and, in changelog mode, are
//! streamed into the changelog of the next version.
//!
//! `commit` applies the batch to the engine and makes the new version
//! durable: by publishing its changelog, or by uploading a full snapshot
//! when changelog checkpointing is off. Publishing is the commit point. If
//! any phase fails, the engine is reloaded at the previous version and
//! [`StoreError::DurabilityFailure`] is returned.
//!
//! ## Snapshots and retention
//!
//! In changelog mode a commit captures a local checkpoint (a pending
//! snapshot) once enough changelogs have accumulated since the last one.
//! [`VersionedStore::do_maintenance`] uploads the newest pending snapshot
//! and purges versions outside the retention window.
//!
//! ## Local layout
//!
//! ```text
//! <local_root>/db/               engine directory
//! <local_root>/checkpoints/<v>/  pending snapshot of version v
//! ```

mod maintenance;
mod session;

#[cfg(test)]
mod tests;

pub use maintenance::{MaintenanceHandle, MaintenanceReport};
pub use session::{ScanIter, Session};

use std::{
    collections::BTreeSet,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::changelog::{ChangelogFormat, ChangelogReader, ChangelogWriter, DEFAULT_COLUMN_FAMILY};
use crate::config::StoreConfig;
use crate::engine::{
    BatchOp, Engine, EngineError, EngineOptions, MergeOperator, StringAppendOperator, WriteBatch,
};
use crate::error::{CommitStage, StoreError};
use crate::file_manager::FileManager;
use crate::fs::CheckpointFs;
use crate::lease::InstanceLease;
use crate::memory::{self, MemoryBudget, SharedMemory};
use crate::metrics::{CommitTimings, StoreMetrics};

const ENGINE_DIR: &str = "db";
const CHECKPOINT_DIR: &str = "checkpoints";

// ------------------------------------------------------------------------------------------------
// Identity
// ------------------------------------------------------------------------------------------------

/// Identity of one logical store.
///
/// Maps to the remote directory `<operator_id>/<partition_id>/<store_name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreIdentity {
    pub operator_id: u64,
    pub partition_id: u32,
    pub store_name: String,
}

impl StoreIdentity {
    pub fn new(operator_id: u64, partition_id: u32, store_name: impl Into<String>) -> Self {
        Self {
            operator_id,
            partition_id,
            store_name: store_name.into(),
        }
    }

    /// Directory of this store relative to the checkpoint root.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.operator_id.to_string())
            .join(self.partition_id.to_string())
            .join(&self.store_name)
    }
}

impl fmt::Display for StoreIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StoreId(opId={},partId={},name={})",
            self.operator_id, self.partition_id, self.store_name
        )
    }
}

// ------------------------------------------------------------------------------------------------
// Shared state
// ------------------------------------------------------------------------------------------------

/// Local checkpoint of a committed version waiting for upload.
#[derive(Debug)]
struct PendingSnapshot {
    version: u64,
    dir: PathBuf,
    num_keys: u64,
}

/// What the local engine currently reflects.
#[derive(Default)]
struct LocalState {
    engine: Option<Engine>,
    loaded_version: Option<u64>,
    /// Live keys at `loaded_version` when row tracking is on.
    num_keys: u64,
    /// Newest snapshot, uploaded or pending, the loaded version builds on.
    snapshot_version: u64,
    /// Changelog bytes committed since `snapshot_version`.
    changelog_bytes: u64,
    /// Changelog records committed since `snapshot_version`.
    changelog_records: u64,
}

/// Everything a commit needs from a session.
pub(crate) struct CommitRequest {
    pub(crate) version: u64,
    pub(crate) batch: WriteBatch,
    pub(crate) key_delta: i64,
    pub(crate) changelog: Option<ChangelogWriter>,
}

pub(crate) struct StoreShared {
    identity: StoreIdentity,
    config: StoreConfig,
    local_root: PathBuf,
    lease: Arc<InstanceLease>,
    files: FileManager,
    memory: Arc<SharedMemory>,
    merge_operator: Arc<dyn MergeOperator>,
    /// Lock order: `state`, then `pending`.
    state: Mutex<LocalState>,
    pending: Mutex<Option<PendingSnapshot>>,
    last_commit: Mutex<CommitTimings>,
    closed: AtomicBool,
}

fn not_loaded() -> StoreError {
    StoreError::Engine(EngineError::Internal("no version is loaded".into()))
}

fn remove_dir_if_exists(dir: &Path) -> io::Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Runs one commit phase and records its duration.
fn timed<T>(
    timings: &mut CommitTimings,
    stage: CommitStage,
    f: impl FnOnce() -> Result<T, StoreError>,
) -> Result<T, (CommitStage, StoreError)> {
    let started = Instant::now();
    let out = f().map_err(|e| (stage, e));
    timings.record(stage, started.elapsed());
    out
}

/// Applies `op` and adjusts `num_keys` by whether the key existed before.
fn apply_counted(engine: &Engine, op: &BatchOp, num_keys: &mut u64) -> Result<(), EngineError> {
    let existed = engine.get(op.column_family(), op.key())?.is_some();
    match op {
        BatchOp::Put {
            column_family,
            key,
            value,
        } => {
            engine.put(column_family, key, value)?;
            if !existed {
                *num_keys += 1;
            }
        }
        BatchOp::Delete { column_family, key } => {
            engine.delete(column_family, key)?;
            if existed {
                *num_keys = num_keys.saturating_sub(1);
            }
        }
        BatchOp::Merge {
            column_family,
            key,
            operand,
        } => {
            engine.merge(column_family, key, operand)?;
            if !existed {
                *num_keys += 1;
            }
        }
    }
    Ok(())
}

impl StoreShared {
    fn engine_dir(&self) -> PathBuf {
        self.local_root.join(ENGINE_DIR)
    }

    fn checkpoint_dir(&self, version: u64) -> PathBuf {
        self.local_root.join(CHECKPOINT_DIR).join(version.to_string())
    }

    fn engine_options(&self) -> EngineOptions {
        let mut opts = EngineOptions::new(Arc::clone(&self.memory));
        if let Some(size) = self.config.write_buffer_size_bytes() {
            opts.write_buffer_size = size;
        }
        opts.max_write_buffer_number = self.config.max_write_buffer_number;
        opts.compression = self.config.compression;
        opts.max_open_files = self.config.max_open_files;
        opts.allow_fallocate = self.config.allow_fallocate;
        opts.merge_operator = Arc::clone(&self.merge_operator);
        opts
    }

    fn changelog_format(&self) -> ChangelogFormat {
        if self.config.column_families {
            ChangelogFormat::MultiFamily
        } else {
            ChangelogFormat::Legacy
        }
    }

    fn check_open(&self, operation: &str) -> Result<(), StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::unsupported(operation, "store is closed"));
        }
        Ok(())
    }

    /// Rejects families other than the default one outside column family
    /// mode.
    pub(crate) fn check_family(&self, operation: &str, cf: &str) -> Result<(), StoreError> {
        if !self.config.column_families && cf != DEFAULT_COLUMN_FAMILY {
            return Err(StoreError::unsupported(
                operation,
                format!("column family `{cf}` requires column family mode"),
            ));
        }
        Ok(())
    }

    pub(crate) fn with_engine<T>(
        &self,
        f: impl FnOnce(&Engine) -> Result<T, EngineError>,
    ) -> Result<T, StoreError> {
        let state = self.state.lock();
        let engine = state.engine.as_ref().ok_or_else(not_loaded)?;
        Ok(f(engine)?)
    }

    /// Changelog writer for the version after `version`, when one is needed.
    pub(crate) fn open_changelog(
        &self,
        version: u64,
        read_only: bool,
    ) -> Result<Option<ChangelogWriter>, StoreError> {
        if read_only || !self.config.changelog_checkpointing {
            return Ok(None);
        }
        let path = self.files.changelog_path(version + 1);
        let writer = ChangelogWriter::create(
            self.files.checkpoint_fs().as_ref(),
            &path,
            self.changelog_format(),
        )?;
        Ok(Some(writer))
    }

    fn latest_version(&self) -> Result<u64, StoreError> {
        let snapshot = self.files.latest_version()?;
        let changelog = self
            .files
            .changelog_versions()?
            .last()
            .copied()
            .unwrap_or(0);
        Ok(snapshot.max(changelog))
    }

    /// Whether changelogs `after+1..=version` all exist.
    fn changelog_chain_exists(&self, after: u64, version: u64) -> Result<bool, StoreError> {
        if after >= version {
            return Ok(true);
        }
        let present: BTreeSet<u64> = self.files.changelog_versions()?.into_iter().collect();
        Ok((after + 1..=version).all(|v| present.contains(&v)))
    }

    // --------------------------------------------------------------------------------------------
    // Pending snapshots
    // --------------------------------------------------------------------------------------------

    fn set_pending(&self, snapshot: PendingSnapshot) {
        let previous = self.pending.lock().replace(snapshot);
        if let Some(old) = previous {
            self.remove_pending_dir(&old);
        }
    }

    /// Drops the pending snapshot if it is newer than `version`, or always
    /// when `version` is `None`.
    fn discard_pending(&self, version: Option<u64>) {
        let mut pending = self.pending.lock();
        let stale = pending
            .as_ref()
            .is_some_and(|p| version.is_none_or(|v| p.version > v));
        if stale && let Some(old) = pending.take() {
            debug!(store = %self.identity, version = old.version, "discarding pending snapshot");
            self.remove_pending_dir(&old);
        }
    }

    fn remove_pending_dir(&self, snapshot: &PendingSnapshot) {
        if let Err(e) = remove_dir_if_exists(&snapshot.dir) {
            warn!(
                store = %self.identity,
                dir = %snapshot.dir.display(),
                "failed to remove pending snapshot: {e}"
            );
        }
    }

    // --------------------------------------------------------------------------------------------
    // Load
    // --------------------------------------------------------------------------------------------

    pub(crate) fn prepare(&self, version: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.load_locked(&mut state, version)
    }

    /// Bring the engine to `version`.
    ///
    /// Replays changelogs on top of the loaded version when it is older and
    /// the chain is complete; otherwise restores the newest snapshot at or
    /// below `version` and replays from there.
    fn load_locked(&self, state: &mut LocalState, version: u64) -> Result<(), StoreError> {
        let started = Instant::now();

        let replay_from = match state.loaded_version {
            Some(loaded) if state.engine.is_some() && loaded <= version => self
                .changelog_chain_exists(loaded, version)?
                .then_some(loaded),
            _ => None,
        };

        match replay_from {
            Some(loaded) => {
                self.discard_pending(Some(version));
                if let Some(snapshot) = self.files.latest_snapshot_at_or_below(version)?
                    && snapshot > state.snapshot_version
                {
                    state.snapshot_version = snapshot;
                    state.changelog_bytes = 0;
                    state.changelog_records = 0;
                }
                if loaded < version {
                    self.replay(state, loaded, version)?;
                }
            }
            None => {
                let snapshot = if version == 0 {
                    0
                } else {
                    self.files.latest_snapshot_at_or_below(version)?.unwrap_or(0)
                };
                if !self.changelog_chain_exists(snapshot, version)? {
                    return Err(StoreError::VersionNotFound {
                        identity: self.identity.to_string(),
                        version,
                        latest: self.latest_version()?,
                    });
                }

                state.engine = None;
                state.loaded_version = None;
                self.discard_pending(None);

                let manifest = self.files.load_checkpoint(snapshot, &self.engine_dir())?;
                state.engine = Some(Engine::open(self.engine_dir(), self.engine_options())?);
                state.loaded_version = Some(snapshot);
                state.num_keys = manifest.num_keys;
                state.snapshot_version = snapshot;
                state.changelog_bytes = 0;
                state.changelog_records = 0;

                if snapshot < version {
                    self.replay(state, snapshot, version)?;
                }
            }
        }

        if self.config.reset_stats_on_load {
            if let Some(engine) = &state.engine {
                engine.reset_stats();
            }
            self.files.reset_metrics();
        }

        debug!(
            store = %self.identity,
            version,
            replayed_from = ?replay_from,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "version loaded"
        );
        Ok(())
    }

    /// Applies changelogs `after+1..=to`. On failure the engine is dropped,
    /// since it no longer matches any version.
    fn replay(&self, state: &mut LocalState, after: u64, to: u64) -> Result<(), StoreError> {
        let result = self.replay_inner(state, after, to);
        if result.is_err() {
            state.engine = None;
            state.loaded_version = None;
        }
        result
    }

    fn replay_inner(&self, state: &mut LocalState, after: u64, to: u64) -> Result<(), StoreError> {
        let engine = state.engine.as_ref().ok_or_else(not_loaded)?;
        let fs = self.files.checkpoint_fs().as_ref();
        let track = self.config.track_total_number_of_rows;

        for version in after + 1..=to {
            let path = self.files.changelog_path(version);
            let reader = ChangelogReader::open(fs, &path)?;
            let mut batch = WriteBatch::new();
            let mut records = 0u64;

            for record in reader {
                let op = BatchOp::from(record?);
                records += 1;
                if track {
                    apply_counted(engine, &op, &mut state.num_keys)?;
                } else {
                    batch.append(op);
                }
            }
            if !batch.is_empty() {
                engine.write(&batch)?;
            }

            if version > state.snapshot_version {
                state.changelog_bytes += fs.status(&path)?.len;
                state.changelog_records += records;
            }
            state.loaded_version = Some(version);
            trace!(store = %self.identity, version, records, "changelog replayed");
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Commit
    // --------------------------------------------------------------------------------------------

    pub(crate) fn commit(&self, request: CommitRequest) -> Result<u64, StoreError> {
        let CommitRequest {
            version,
            batch,
            key_delta,
            mut changelog,
        } = request;
        let new_version = version + 1;
        let started = Instant::now();
        let mut timings = CommitTimings::default();
        let mut state = self.state.lock();

        let outcome = self.commit_phases(
            &mut state,
            new_version,
            &batch,
            key_delta,
            &mut changelog,
            &mut timings,
        );
        match outcome {
            Ok(snapshot) => {
                *self.last_commit.lock() = timings;
                info!(
                    store = %self.identity,
                    version = new_version,
                    ops = batch.len(),
                    snapshot,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "version committed"
                );
                Ok(new_version)
            }
            Err((stage, source)) => {
                if let Some(writer) = changelog.as_mut() {
                    writer.abort();
                }
                if let Err(e) = remove_dir_if_exists(&self.checkpoint_dir(new_version)) {
                    warn!(store = %self.identity, "failed to remove partial checkpoint: {e}");
                }
                error!(
                    store = %self.identity,
                    version = new_version,
                    %stage,
                    "commit failed: {source}"
                );

                state.engine = None;
                state.loaded_version = None;
                if let Err(e) = self.load_locked(&mut state, version) {
                    warn!(
                        store = %self.identity,
                        version,
                        "failed to restore the previous version, the next load rebuilds it: {e}"
                    );
                }
                Err(StoreError::DurabilityFailure {
                    version: new_version,
                    stage,
                    source: Box::new(source),
                })
            }
        }
    }

    /// Returns whether a snapshot was captured.
    fn commit_phases(
        &self,
        state: &mut LocalState,
        new_version: u64,
        batch: &WriteBatch,
        key_delta: i64,
        changelog: &mut Option<ChangelogWriter>,
        timings: &mut CommitTimings,
    ) -> Result<bool, (CommitStage, StoreError)> {
        let engine = state
            .engine
            .as_ref()
            .ok_or_else(|| (CommitStage::WriteBatch, not_loaded()))?;

        timed(timings, CommitStage::WriteBatch, || Ok(engine.write(batch)?))?;

        let num_keys = if self.config.track_total_number_of_rows {
            u64::try_from((state.num_keys as i64).saturating_add(key_delta)).unwrap_or(0)
        } else {
            engine.approximate_num_keys()
        };
        let (log_bytes, log_records) = changelog
            .as_ref()
            .map_or((0, 0), |w| (w.bytes_written(), w.records()));

        let snapshot = !self.config.changelog_checkpointing || {
            let cfg = &self.config;
            new_version.saturating_sub(state.snapshot_version) >= cfg.min_deltas_for_snapshot
                || (cfg.snapshot_changelog_bytes > 0
                    && state.changelog_bytes + log_bytes >= cfg.snapshot_changelog_bytes)
                || (cfg.snapshot_changelog_records > 0
                    && state.changelog_records + log_records >= cfg.snapshot_changelog_records)
        };

        if snapshot {
            timed(timings, CommitStage::Flush, || Ok(engine.flush()?))?;
        }
        if self.config.compact_on_commit {
            timed(timings, CommitStage::Compaction, || Ok(engine.compact()?))?;
        }
        let checkpoint = if snapshot {
            let dir = self.checkpoint_dir(new_version);
            Some(timed(timings, CommitStage::Checkpoint, || {
                remove_dir_if_exists(&dir)?;
                engine.checkpoint(&dir)?;
                Ok(dir)
            })?)
        } else {
            None
        };

        if let Some(writer) = changelog.as_mut() {
            timed(timings, CommitStage::Changelog, || Ok(writer.commit()?))?;
        }

        if let Some(dir) = checkpoint {
            if self.config.changelog_checkpointing {
                self.set_pending(PendingSnapshot {
                    version: new_version,
                    dir,
                    num_keys,
                });
            } else {
                timed(timings, CommitStage::FileSync, || {
                    self.files.save_checkpoint(&dir, new_version, num_keys)?;
                    Ok(())
                })?;
                if let Err(e) = remove_dir_if_exists(&dir) {
                    warn!(store = %self.identity, "failed to remove uploaded checkpoint: {e}");
                }
            }
        }

        state.loaded_version = Some(new_version);
        state.num_keys = num_keys;
        if snapshot {
            state.snapshot_version = new_version;
            state.changelog_bytes = 0;
            state.changelog_records = 0;
        } else {
            state.changelog_bytes += log_bytes;
            state.changelog_records += log_records;
        }
        Ok(snapshot)
    }
}

// ------------------------------------------------------------------------------------------------
// Store handle
// ------------------------------------------------------------------------------------------------

/// One logical store instance.
///
/// The handle is cheap to share across threads; sessions on the same
/// identity are serialized by its lease.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use versioned_state_store::{LocalCheckpointFs, StoreConfig, StoreIdentity, VersionedStore};
///
/// let store = VersionedStore::open(
///     StoreIdentity::new(1, 0, "default"),
///     "/tmp/state/local",
///     Arc::new(LocalCheckpointFs::new()),
///     "/tmp/state/remote",
///     StoreConfig { changelog_checkpointing: true, ..StoreConfig::default() },
/// )
/// .unwrap();
///
/// let mut session = store.load(0).unwrap();
/// session.put(b"key", b"value").unwrap();
/// assert_eq!(session.commit().unwrap(), 1);
///
/// let session = store.load(1).unwrap();
/// assert_eq!(session.get(b"key").unwrap(), Some(b"value".to_vec()));
/// session.rollback();
/// store.do_maintenance();
/// store.close().unwrap();
/// ```
pub struct VersionedStore {
    shared: Arc<StoreShared>,
}

impl fmt::Debug for VersionedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedStore")
            .field("identity", &self.shared.identity)
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl VersionedStore {
    /// Opens the store `identity` with its engine under `local_root` and its
    /// checkpoints under `remote_root/<identity path>` on `fs`.
    ///
    /// Nothing is loaded until the first [`load`](Self::load).
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidConfiguration`] when `config` fails validation.
    pub fn open(
        identity: StoreIdentity,
        local_root: impl Into<PathBuf>,
        checkpoint_fs: Arc<dyn CheckpointFs>,
        remote_root: impl AsRef<Path>,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        config.validate()?;

        let local_root = local_root.into();
        fs::create_dir_all(&local_root)?;
        remove_dir_if_exists(&local_root.join(CHECKPOINT_DIR))?;

        let memory = if config.bounded_memory_usage {
            memory::shared(MemoryBudget::new(
                config.total_memory_bytes(),
                config.write_buffer_cache_ratio,
                config.high_priority_pool_ratio,
            ))
        } else {
            memory::private(config.block_cache_bytes())
        };

        let remote = remote_root.as_ref().join(identity.relative_path());
        let files = FileManager::new(checkpoint_fs, remote.clone(), config.dedup_policy);
        let lease = InstanceLease::for_identity(&identity.to_string());

        info!(
            store = %identity,
            local = %local_root.display(),
            remote = %remote.display(),
            changelog = config.changelog_checkpointing,
            column_families = config.column_families,
            bounded_memory = config.bounded_memory_usage,
            "store opened"
        );

        Ok(Self {
            shared: Arc::new(StoreShared {
                identity,
                config,
                local_root,
                lease,
                files,
                memory,
                merge_operator: Arc::new(StringAppendOperator),
                state: Mutex::new(LocalState::default()),
                pending: Mutex::new(None),
                last_commit: Mutex::new(CommitTimings::default()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn identity(&self) -> &StoreIdentity {
        &self.shared.identity
    }

    pub fn config(&self) -> &StoreConfig {
        &self.shared.config
    }

    /// Remote file manager of this store.
    pub fn file_manager(&self) -> &FileManager {
        &self.shared.files
    }

    /// Takes the lease and positions a writable session at `version`.
    ///
    /// Blocks up to `lockAcquireTimeoutMs` while another session holds the
    /// store. The lease is not re-entrant: while a session is open, call
    /// [`Session::load`] on it to move to another version. Calling `load`
    /// again on the thread that holds the session fails at once instead of
    /// waiting for itself.
    ///
    /// # Errors
    ///
    /// - [`StoreError::InstanceUnavailable`] when the lease is not released
    ///   in time, or right away when the calling thread already holds it.
    /// - [`StoreError::VersionNotFound`] when neither a snapshot nor a
    ///   complete changelog chain reaches `version`.
    pub fn load(&self, version: u64) -> Result<Session, StoreError> {
        self.load_with(version, false)
    }

    /// Like [`load`](Self::load), but the session rejects mutations and
    /// writes no changelog.
    pub fn load_read_only(&self, version: u64) -> Result<Session, StoreError> {
        self.load_with(version, true)
    }

    fn load_with(&self, version: u64, read_only: bool) -> Result<Session, StoreError> {
        let shared = &self.shared;
        shared.check_open("load")?;

        let holder = format!("load(version={version}, readOnly={read_only})");
        let timeout = Duration::from_millis(shared.config.lock_acquire_timeout_ms);
        let guard = shared.lease.acquire(&holder, timeout)?;

        shared.prepare(version)?;
        let changelog = shared.open_changelog(version, read_only)?;
        Ok(Session::new(Arc::clone(shared), guard, version, read_only, changelog))
    }

    /// Highest committed version visible remotely, by manifest or
    /// changelog.
    pub fn latest_version(&self) -> Result<u64, StoreError> {
        self.shared.latest_version()
    }

    /// Uploads the newest pending snapshot, then purges versions outside
    /// the retention window. Failures are logged and retried next time.
    pub fn do_maintenance(&self) -> MaintenanceReport {
        self.shared.maintain()
    }

    /// Runs [`do_maintenance`](Self::do_maintenance) every `interval` on a
    /// background thread until the handle is stopped or dropped.
    pub fn spawn_maintenance(&self, interval: Duration) -> Result<MaintenanceHandle, StoreError> {
        Ok(maintenance::spawn(Arc::clone(&self.shared), interval)?)
    }

    /// Current metrics.
    pub fn metrics(&self) -> StoreMetrics {
        let shared = &self.shared;
        let state = shared.state.lock();
        StoreMetrics {
            loaded_version: state.loaded_version,
            num_committed_keys: (shared.config.track_total_number_of_rows
                && state.loaded_version.is_some())
            .then_some(state.num_keys),
            last_commit: *shared.last_commit.lock(),
            pending_snapshots: usize::from(shared.pending.lock().is_some()),
            file_manager: shared.files.metrics(),
            engine: state.engine.as_ref().map(Engine::metrics).unwrap_or_default(),
            block_cache_capacity: shared.memory.cache().capacity(),
        }
    }

    /// Releases the engine and pending snapshots.
    ///
    /// Waits for an active session like [`load`](Self::load) does. Later
    /// loads fail with [`StoreError::UnsupportedOperation`]. Calling `close`
    /// more than once is harmless.
    pub fn close(&self) -> Result<(), StoreError> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let timeout = Duration::from_millis(shared.config.lock_acquire_timeout_ms);
        let _guard = shared.lease.acquire("close", timeout)?;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut state = shared.state.lock();
        state.engine = None;
        state.loaded_version = None;
        drop(state);
        shared.discard_pending(None);
        remove_dir_if_exists(&shared.local_root.join(CHECKPOINT_DIR))?;

        info!(store = %shared.identity, "store closed");
        Ok(())
    }
}
