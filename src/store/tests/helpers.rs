use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::fs::LocalCheckpointFs;
use crate::store::{Session, StoreIdentity, VersionedStore};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Identity unique to the calling test, so leases never collide.
pub fn unique_identity() -> StoreIdentity {
    StoreIdentity::new(1, 0, format!("store-{}", Uuid::new_v4().simple()))
}

/// Store with its local state under `root/<local>` and checkpoints under
/// `root/remote`.
pub fn open_at(
    root: &Path,
    local: &str,
    identity: StoreIdentity,
    config: StoreConfig,
) -> VersionedStore {
    init_tracing();
    VersionedStore::open(
        identity,
        root.join(local),
        Arc::new(LocalCheckpointFs::new()),
        root.join("remote"),
        config,
    )
    .unwrap()
}

pub fn open(root: &Path, config: StoreConfig) -> VersionedStore {
    open_at(root, "local", unique_identity(), config)
}

pub fn changelog_config() -> StoreConfig {
    StoreConfig {
        changelog_checkpointing: true,
        lock_acquire_timeout_ms: 2_000,
        ..StoreConfig::default()
    }
}

pub fn snapshot_config() -> StoreConfig {
    StoreConfig {
        lock_acquire_timeout_ms: 2_000,
        ..StoreConfig::default()
    }
}

/// Load `version`, apply `puts`, commit.
pub fn commit_puts(store: &VersionedStore, version: u64, puts: &[(&str, &str)]) -> u64 {
    let mut session = store.load(version).unwrap();
    for (k, v) in puts {
        session.put(k.as_bytes(), v.as_bytes()).unwrap();
    }
    session.commit().unwrap()
}

/// Value of `key` at `version` as a string.
pub fn read(store: &VersionedStore, version: u64, key: &str) -> Option<String> {
    let session = store.load_read_only(version).unwrap();
    get(&session, key)
}

pub fn get(session: &Session, key: &str) -> Option<String> {
    session
        .get(key.as_bytes())
        .unwrap()
        .map(|v| String::from_utf8(v).unwrap())
}

/// All live pairs of a scan as strings.
pub fn collect(
    iter: impl Iterator<Item = Result<(Vec<u8>, Vec<u8>), StoreError>>,
) -> Vec<(String, String)> {
    iter.map(|r| {
        let (k, v) = r.unwrap();
        (String::from_utf8(k).unwrap(), String::from_utf8(v).unwrap())
    })
    .collect()
}
