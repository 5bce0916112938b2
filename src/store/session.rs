//! Lease-holding handle on one loaded version.

use std::{collections::BTreeMap, fmt, mem, sync::Arc};

use tracing::debug;

use super::{CommitRequest, StoreShared};
use crate::changelog::{ChangelogWriter, DEFAULT_COLUMN_FAMILY};
use crate::engine::iter::{LayerEntry, LayerIter};
use crate::engine::{LiveEntries, MergeIterator, WriteBatch};
use crate::error::StoreError;
use crate::lease::LeaseGuard;

/// Uncommitted writes keyed by `(column family, key)`; `None` is a delete.
type Overlay = BTreeMap<(String, Vec<u8>), Option<Vec<u8>>>;

/// Exclusive access to a store positioned at one version.
///
/// Obtained from [`VersionedStore::load`](super::VersionedStore::load).
/// Reads see the loaded version plus this session's own uncommitted writes.
/// [`commit`](Self::commit) publishes them as the next version and
/// [`rollback`](Self::rollback) discards them; both release the lease, and
/// so does dropping the session.
pub struct Session {
    shared: Arc<StoreShared>,
    guard: LeaseGuard,
    version: u64,
    read_only: bool,
    batch: WriteBatch,
    overlay: Overlay,
    changelog: Option<ChangelogWriter>,
    /// Change in live keys caused by `batch`, when rows are tracked.
    key_delta: i64,
    done: bool,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("store", &self.shared.identity)
            .field("version", &self.version)
            .field("read_only", &self.read_only)
            .field("pending_ops", &self.batch.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(super) fn new(
        shared: Arc<StoreShared>,
        guard: LeaseGuard,
        version: u64,
        read_only: bool,
        changelog: Option<ChangelogWriter>,
    ) -> Self {
        Self {
            shared,
            guard,
            version,
            read_only,
            batch: WriteBatch::new(),
            overlay: Overlay::new(),
            changelog,
            key_delta: 0,
            done: false,
        }
    }

    /// Version this session was loaded at.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Number of uncommitted mutations.
    pub fn pending_ops(&self) -> usize {
        self.batch.len()
    }

    // --------------------------------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------------------------------

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.get_cf(DEFAULT_COLUMN_FAMILY, key)
    }

    pub fn get_cf(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.shared.check_family("get", cf)?;
        self.lookup(cf, key)
    }

    fn lookup(&self, cf: &str, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(value) = self.overlay.get(&(cf.to_owned(), key.to_vec())) {
            return Ok(value.clone());
        }
        self.shared.with_engine(|engine| engine.get(cf, key))
    }

    /// Every live pair of the default family, in key order.
    pub fn iter(&self) -> Result<ScanIter, StoreError> {
        self.iter_cf(DEFAULT_COLUMN_FAMILY)
    }

    pub fn iter_cf(&self, cf: &str) -> Result<ScanIter, StoreError> {
        self.scan("iter", cf, &[])
    }

    /// Live pairs of the default family whose key starts with `prefix`.
    pub fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanIter, StoreError> {
        self.prefix_scan_cf(DEFAULT_COLUMN_FAMILY, prefix)
    }

    pub fn prefix_scan_cf(&self, cf: &str, prefix: &[u8]) -> Result<ScanIter, StoreError> {
        self.scan("prefixScan", cf, prefix)
    }

    fn scan(&self, operation: &str, cf: &str, prefix: &[u8]) -> Result<ScanIter, StoreError> {
        self.shared.check_family(operation, cf)?;

        let pending: Vec<LayerEntry> = self
            .overlay
            .range((cf.to_owned(), prefix.to_vec())..)
            .take_while(|((family, key), _)| family == cf && key.starts_with(prefix))
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect();
        let committed = self.shared.with_engine(|engine| {
            if prefix.is_empty() {
                engine.iter(cf)
            } else {
                engine.prefix_scan(cf, prefix)
            }
        })?;

        let layers: Vec<LayerIter> = vec![
            Box::new(pending.into_iter().map(Ok)),
            Box::new(committed.map(|r| r.map(|(key, value)| (key, Some(value))))),
        ];
        Ok(ScanIter {
            inner: LiveEntries::new(MergeIterator::new(layers)),
        })
    }

    // --------------------------------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------------------------------

    fn check_writable(&self, operation: &str, cf: &str) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::unsupported(operation, "session is read-only"));
        }
        self.shared.check_family(operation, cf)
    }

    /// Whether `key` is live before this mutation, when rows are tracked.
    fn exists_for_count(&self, cf: &str, key: &[u8]) -> Result<Option<bool>, StoreError> {
        if !self.shared.config.track_total_number_of_rows {
            return Ok(None);
        }
        Ok(Some(self.lookup(cf, key)?.is_some()))
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.put_cf(DEFAULT_COLUMN_FAMILY, key, value)
    }

    pub fn put_cf(&mut self, cf: &str, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.check_writable("put", cf)?;
        let existed = self.exists_for_count(cf, key)?;

        if let Some(writer) = self.changelog.as_mut() {
            writer.put(key, value, cf)?;
        }
        self.batch.put(cf, key, value);
        self.overlay
            .insert((cf.to_owned(), key.to_vec()), Some(value.to_vec()));
        if existed == Some(false) {
            self.key_delta += 1;
        }
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<(), StoreError> {
        self.delete_cf(DEFAULT_COLUMN_FAMILY, key)
    }

    pub fn delete_cf(&mut self, cf: &str, key: &[u8]) -> Result<(), StoreError> {
        self.check_writable("delete", cf)?;
        let existed = self.exists_for_count(cf, key)?;

        if let Some(writer) = self.changelog.as_mut() {
            writer.delete(key, cf)?;
        }
        self.batch.delete(cf, key);
        self.overlay.insert((cf.to_owned(), key.to_vec()), None);
        if existed == Some(true) {
            self.key_delta -= 1;
        }
        Ok(())
    }

    /// Merge `operand` into the value of `key` with the store's merge
    /// operator. Requires column family mode.
    pub fn merge(&mut self, key: &[u8], operand: &[u8]) -> Result<(), StoreError> {
        self.merge_cf(DEFAULT_COLUMN_FAMILY, key, operand)
    }

    pub fn merge_cf(&mut self, cf: &str, key: &[u8], operand: &[u8]) -> Result<(), StoreError> {
        self.check_writable("merge", cf)?;
        if !self.shared.config.column_families {
            return Err(StoreError::unsupported(
                "merge",
                "merge requires column family mode",
            ));
        }
        let current = self.lookup(cf, key)?;

        if let Some(writer) = self.changelog.as_mut() {
            writer.merge(key, operand, cf)?;
        }
        self.batch.merge(cf, key, operand);
        let merged = self.shared.merge_operator.merge(current.as_deref(), operand);
        self.overlay.insert((cf.to_owned(), key.to_vec()), Some(merged));
        if self.shared.config.track_total_number_of_rows && current.is_none() {
            self.key_delta += 1;
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Lifecycle
    // --------------------------------------------------------------------------------------------

    /// Discard uncommitted writes and reposition at `version` without
    /// giving up the lease.
    pub fn load(&mut self, version: u64) -> Result<(), StoreError> {
        self.discard();
        self.shared.prepare(version)?;
        self.changelog = self.shared.open_changelog(version, self.read_only)?;
        self.version = version;
        Ok(())
    }

    /// Publish the uncommitted writes as version `version() + 1` and
    /// release the lease.
    ///
    /// # Errors
    ///
    /// - [`StoreError::UnsupportedOperation`] on a read-only session.
    /// - [`StoreError::DurabilityFailure`] when a commit phase fails; the
    ///   store stays at the previous version.
    pub fn commit(mut self) -> Result<u64, StoreError> {
        if self.read_only {
            return Err(StoreError::unsupported("commit", "session is read-only"));
        }
        self.done = true;
        self.overlay.clear();
        let request = CommitRequest {
            version: self.version,
            batch: mem::take(&mut self.batch),
            key_delta: mem::replace(&mut self.key_delta, 0),
            changelog: self.changelog.take(),
        };
        let result = self.shared.commit(request);
        self.guard.release();
        result
    }

    /// Discard the uncommitted writes and release the lease.
    pub fn rollback(mut self) {
        self.abort();
    }

    fn discard(&mut self) {
        if let Some(mut writer) = self.changelog.take() {
            writer.abort();
        }
        self.batch.clear();
        self.overlay.clear();
        self.key_delta = 0;
    }

    fn abort(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        if !self.batch.is_empty() {
            debug!(
                store = %self.shared.identity,
                version = self.version,
                ops = self.batch.len(),
                "rolling back uncommitted writes"
            );
        }
        self.discard();
        self.guard.release();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort();
    }
}

// ------------------------------------------------------------------------------------------------
// Scans
// ------------------------------------------------------------------------------------------------

/// Key-ordered scan over committed data and a session's uncommitted writes.
pub struct ScanIter {
    inner: LiveEntries,
}

impl Iterator for ScanIter {
    type Item = Result<(Vec<u8>, Vec<u8>), StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|r| r.map_err(StoreError::from))
    }
}
