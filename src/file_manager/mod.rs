//! Remote File Manager
//!
//! Maps the files of a local engine checkpoint onto deduplicated remote
//! copies and keeps the per-version manifests that tie them together.
//!
//! # Remote layout
//!
//! ```text
//! <root>/
//!   <version>.manifest             one per snapshot
//!   SSTs/<stem>-<uuid>.sst         data files
//!   logs/<stem>-<uuid>.<ext>       other engine files
//!   logs/<version>.changelog       one per committed version
//! ```
//!
//! Remote file names carry a fresh UUID, so uploads never overwrite an
//! existing object. A local file whose name and size match a file already
//! uploaded by this manager reuses that remote copy; under
//! [`DedupPolicy::ContentChecksum`] the CRC32 of the contents must match as
//! well. The manifest is written last and is the commit point of a snapshot.
//!
//! # Retention
//!
//! [`FileManager::delete_old_versions`] keeps the newest snapshots plus the
//! nearest older snapshot every retained version can be replayed from, and
//! deletes remote files that no retained manifest names once they are older
//! than the oldest retained manifest.

#[cfg(test)]
mod tests;

pub mod manifest;

use std::{
    collections::{HashMap, HashSet},
    fs::{self, File},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::config::DedupPolicy;
use crate::fs::{CheckpointFs, discard_file};
pub use manifest::{CheckpointFile, CheckpointManifest, FileKind, MANIFEST_FORMAT};

const MANIFEST_SUFFIX: &str = ".manifest";
const CHANGELOG_SUFFIX: &str = ".changelog";

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the file manager.
#[derive(Debug, Error)]
pub enum FileManagerError {
    /// Underlying I/O error, local or remote.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Manifest body is not valid JSON.
    #[error("manifest JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No manifest exists for the requested version.
    #[error("checkpoint for version {version} not found at {}", path.display())]
    CheckpointNotFound { version: u64, path: PathBuf },

    /// The manifest was written in a format this build cannot read.
    #[error("unsupported checkpoint format `{actual}`, expected `{expected}`")]
    UnsupportedCheckpointVersion {
        expected: &'static str,
        actual: String,
    },

    /// A downloaded or reused file does not match the manifest.
    #[error("file {file} does not match its manifest entry: {reason}")]
    Mismatch { file: String, reason: String },

    /// A local file name is not valid UTF-8.
    #[error("invalid local file name {0:?}")]
    InvalidFileName(PathBuf),
}

// ------------------------------------------------------------------------------------------------
// Reports & counters
// ------------------------------------------------------------------------------------------------

/// Outcome of [`FileManager::save_checkpoint`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub version: u64,
    pub files_uploaded: usize,
    pub bytes_uploaded: u64,
    pub files_reused: usize,
    /// Manifest that was written.
    pub manifest: CheckpointManifest,
}

/// Outcome of [`FileManager::delete_old_versions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Oldest snapshot kept; `None` when there was nothing to purge.
    pub boundary: Option<u64>,
    pub manifests_deleted: Vec<u64>,
    pub changelogs_deleted: Vec<u64>,
    /// Remote file names deleted.
    pub files_deleted: Vec<String>,
}

/// Cumulative transfer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileManagerMetrics {
    pub files_uploaded: u64,
    pub bytes_uploaded: u64,
    pub files_reused: u64,
    pub files_downloaded: u64,
    pub bytes_downloaded: u64,
    pub files_deleted: u64,
}

#[derive(Debug, Default)]
struct Counters {
    files_uploaded: AtomicU64,
    bytes_uploaded: AtomicU64,
    files_reused: AtomicU64,
    files_downloaded: AtomicU64,
    bytes_downloaded: AtomicU64,
    files_deleted: AtomicU64,
}

// ------------------------------------------------------------------------------------------------
// File manager
// ------------------------------------------------------------------------------------------------

/// Remote checkpoint storage of one store identity.
#[derive(Debug)]
pub struct FileManager {
    fs: Arc<dyn CheckpointFs>,
    root: PathBuf,
    policy: DedupPolicy,
    /// Local file name to the remote copy known to hold the same contents.
    ///
    /// Also serializes save, load and purge.
    known: Mutex<HashMap<String, CheckpointFile>>,
    counters: Counters,
}

/// Parse `<n><suffix>`.
fn parse_versioned(name: &str, suffix: &str) -> Option<u64> {
    name.strip_suffix(suffix)?.parse().ok()
}

/// CRC32 of a local file.
pub(crate) fn file_checksum(path: &Path) -> io::Result<u32> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize())
}

fn unique_remote_name(local_name: &str) -> String {
    let id = uuid::Uuid::new_v4();
    match local_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}-{id}.{ext}"),
        None => format!("{local_name}-{id}"),
    }
}

/// Regular files directly inside `dir`, sorted by name.
fn local_files(dir: &Path) -> Result<Vec<(String, PathBuf, u64)>, FileManagerError> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry
            .file_name()
            .into_string()
            .map_err(|_| FileManagerError::InvalidFileName(path.clone()))?;
        out.push((name, path, meta.len()));
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(out)
}

impl FileManager {
    /// Manager for the store rooted at `root` on `fs`.
    pub fn new(fs: Arc<dyn CheckpointFs>, root: impl Into<PathBuf>, policy: DedupPolicy) -> Self {
        Self {
            fs,
            root: root.into(),
            policy,
            known: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Remote root of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> DedupPolicy {
        self.policy
    }

    /// Filesystem the manager writes to.
    pub fn checkpoint_fs(&self) -> &Arc<dyn CheckpointFs> {
        &self.fs
    }

    /// `<root>/<version>.manifest`
    pub fn manifest_path(&self, version: u64) -> PathBuf {
        self.root.join(format!("{version}{MANIFEST_SUFFIX}"))
    }

    /// `<root>/logs/<version>.changelog`
    pub fn changelog_path(&self, version: u64) -> PathBuf {
        self.root
            .join(FileKind::Log.dir_name())
            .join(format!("{version}{CHANGELOG_SUFFIX}"))
    }

    fn remote_path(&self, file: &CheckpointFile) -> PathBuf {
        self.root.join(file.kind.dir_name()).join(&file.remote_name)
    }

    // --------------------------------------------------------------------------------------------
    // Listing
    // --------------------------------------------------------------------------------------------

    /// Versions that have a manifest, ascending.
    pub fn snapshot_versions(&self) -> Result<Vec<u64>, FileManagerError> {
        let mut versions: Vec<u64> = self
            .fs
            .list(&self.root)?
            .iter()
            .filter_map(|s| s.file_name().and_then(|n| parse_versioned(n, MANIFEST_SUFFIX)))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Versions that have a changelog, ascending.
    pub fn changelog_versions(&self) -> Result<Vec<u64>, FileManagerError> {
        let mut versions: Vec<u64> = self
            .fs
            .list(&self.root.join(FileKind::Log.dir_name()))?
            .iter()
            .filter_map(|s| s.file_name().and_then(|n| parse_versioned(n, CHANGELOG_SUFFIX)))
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    /// Highest version with a manifest, 0 when there is none.
    pub fn latest_version(&self) -> Result<u64, FileManagerError> {
        Ok(self.snapshot_versions()?.last().copied().unwrap_or(0))
    }

    /// Newest snapshot at or below `version`.
    pub fn latest_snapshot_at_or_below(
        &self,
        version: u64,
    ) -> Result<Option<u64>, FileManagerError> {
        Ok(self
            .snapshot_versions()?
            .into_iter()
            .rev()
            .find(|v| *v <= version))
    }

    /// Read and parse the manifest of `version`.
    pub fn read_manifest(&self, version: u64) -> Result<CheckpointManifest, FileManagerError> {
        let path = self.manifest_path(version);
        let mut input = match self.fs.open(&path) {
            Ok(input) => input,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FileManagerError::CheckpointNotFound { version, path });
            }
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        CheckpointManifest::decode(&bytes)
    }

    // --------------------------------------------------------------------------------------------
    // Save
    // --------------------------------------------------------------------------------------------

    /// Upload the checkpoint in `local_dir` as snapshot `version`.
    ///
    /// Saving the same files again uploads nothing. Saving different files
    /// for an existing version uploads only what changed and replaces the
    /// manifest.
    pub fn save_checkpoint(
        &self,
        local_dir: &Path,
        version: u64,
        num_keys: u64,
    ) -> Result<SaveReport, FileManagerError> {
        let started = Instant::now();
        let mut known = self.known.lock();

        self.fs.mkdirs(&self.root.join(FileKind::Sst.dir_name()))?;
        self.fs.mkdirs(&self.root.join(FileKind::Log.dir_name()))?;

        let mut files = Vec::new();
        let mut files_uploaded = 0usize;
        let mut bytes_uploaded = 0u64;
        let mut files_reused = 0usize;

        for (name, path, size) in local_files(local_dir)? {
            let checksum = match self.policy {
                DedupPolicy::NameAndSize => None,
                DedupPolicy::ContentChecksum => Some(file_checksum(&path)?),
            };

            let reusable = known
                .get(&name)
                .filter(|f| f.size_bytes == size && f.checksum == checksum)
                .cloned();
            let file = match reusable {
                Some(file) => {
                    trace!(file = %name, remote = %file.remote_name, "reusing remote copy");
                    files_reused += 1;
                    file
                }
                None => {
                    let file = CheckpointFile {
                        remote_name: unique_remote_name(&name),
                        local_name: name.clone(),
                        size_bytes: size,
                        checksum,
                        kind: FileKind::of(&name),
                    };
                    let copied = self.fs.copy_from_local(&path, &self.remote_path(&file))?;
                    if copied != size {
                        return Err(FileManagerError::Mismatch {
                            file: name,
                            reason: format!("uploaded {copied} bytes, expected {size}"),
                        });
                    }
                    trace!(file = %name, remote = %file.remote_name, size, "uploaded");
                    files_uploaded += 1;
                    bytes_uploaded += size;
                    file
                }
            };
            files.push(file);
        }

        let manifest = CheckpointManifest { files, num_keys };
        let bytes = manifest.encode()?;
        let mut out = self.fs.create_atomic(&self.manifest_path(version), true)?;
        if let Err(e) = out.write_all(&bytes) {
            if let Err(cancel_err) = out.cancel() {
                warn!(version, "failed to cancel manifest write: {cancel_err}");
            }
            return Err(e.into());
        }
        out.commit()?;

        for file in &manifest.files {
            known.insert(file.local_name.clone(), file.clone());
        }

        self.counters
            .files_uploaded
            .fetch_add(files_uploaded as u64, Ordering::Relaxed);
        self.counters
            .bytes_uploaded
            .fetch_add(bytes_uploaded, Ordering::Relaxed);
        self.counters
            .files_reused
            .fetch_add(files_reused as u64, Ordering::Relaxed);

        info!(
            root = %self.root.display(),
            version,
            files_uploaded,
            files_reused,
            bytes_uploaded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "checkpoint saved"
        );
        Ok(SaveReport {
            version,
            files_uploaded,
            bytes_uploaded,
            files_reused,
            manifest,
        })
    }

    // --------------------------------------------------------------------------------------------
    // Load
    // --------------------------------------------------------------------------------------------

    /// Make `dest_dir` hold exactly the files of snapshot `version`.
    ///
    /// Files not named by the manifest are deleted. Files whose name and size
    /// already match are kept unless they are known to come from a different
    /// remote copy; everything else is downloaded. Version 0 leaves the
    /// directory empty.
    pub fn load_checkpoint(
        &self,
        version: u64,
        dest_dir: &Path,
    ) -> Result<CheckpointManifest, FileManagerError> {
        let started = Instant::now();
        let mut known = self.known.lock();

        let manifest = if version == 0 {
            CheckpointManifest::default()
        } else {
            self.read_manifest(version)?
        };
        fs::create_dir_all(dest_dir)?;

        let wanted: HashMap<&str, &CheckpointFile> = manifest
            .files
            .iter()
            .map(|f| (f.local_name.as_str(), f))
            .collect();

        let mut present = HashSet::new();
        for (name, path, size) in local_files(dest_dir)? {
            match wanted.get(name.as_str()) {
                Some(file) if file.size_bytes == size => {
                    present.insert(name);
                }
                _ => {
                    trace!(file = %name, "removing local file not in checkpoint");
                    fs::remove_file(&path)?;
                    known.remove(&name);
                }
            }
        }

        let mut downloaded = 0u64;
        let mut bytes_downloaded = 0u64;
        for file in &manifest.files {
            let local = dest_dir.join(&file.local_name);
            let mut reuse = present.contains(&file.local_name)
                && known
                    .get(&file.local_name)
                    .is_none_or(|k| k.remote_name == file.remote_name);
            if reuse && let Some(expected) = file.checksum {
                reuse = file_checksum(&local)? == expected;
            }
            if reuse {
                continue;
            }

            let n = self.fs.copy_to_local(&self.remote_path(file), &local)?;
            if n != file.size_bytes {
                return Err(FileManagerError::Mismatch {
                    file: file.remote_name.clone(),
                    reason: format!("downloaded {n} bytes, expected {}", file.size_bytes),
                });
            }
            if let Some(expected) = file.checksum {
                let actual = file_checksum(&local)?;
                if actual != expected {
                    discard_file(&local);
                    return Err(FileManagerError::Mismatch {
                        file: file.remote_name.clone(),
                        reason: format!("checksum {actual:#010x}, expected {expected:#010x}"),
                    });
                }
            }
            downloaded += 1;
            bytes_downloaded += n;
        }

        known.clear();
        for file in &manifest.files {
            known.insert(file.local_name.clone(), file.clone());
        }

        self.counters
            .files_downloaded
            .fetch_add(downloaded, Ordering::Relaxed);
        self.counters
            .bytes_downloaded
            .fetch_add(bytes_downloaded, Ordering::Relaxed);

        debug!(
            root = %self.root.display(),
            version,
            files = manifest.files.len(),
            downloaded,
            bytes_downloaded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "checkpoint loaded"
        );
        Ok(manifest)
    }

    // --------------------------------------------------------------------------------------------
    // Purge
    // --------------------------------------------------------------------------------------------

    /// Delete snapshots, changelogs and files outside the retention window.
    ///
    /// The boundary is the newest snapshot at or below
    /// `newest - retain_last + 1`; without one nothing is deleted. Manifests
    /// and changelogs below the boundary are deleted. Remote files are
    /// deleted when no kept manifest names them and they were last modified
    /// before the boundary manifest; with fewer than two snapshots no file
    /// is deleted.
    pub fn delete_old_versions(&self, retain_last: u64) -> Result<PurgeReport, FileManagerError> {
        let mut known = self.known.lock();

        let versions = self.snapshot_versions()?;
        let Some(&newest) = versions.last() else {
            return Ok(PurgeReport::default());
        };
        let Some(target) = newest.saturating_add(1).checked_sub(retain_last.max(1)) else {
            return Ok(PurgeReport::default());
        };
        let Some(boundary) = versions.iter().rev().copied().find(|v| *v <= target) else {
            return Ok(PurgeReport::default());
        };

        let mut report = PurgeReport {
            boundary: Some(boundary),
            ..PurgeReport::default()
        };

        if versions.len() >= 2 {
            let mut referenced = HashSet::new();
            for version in versions.iter().filter(|v| **v >= boundary) {
                for file in self.read_manifest(*version)?.files {
                    referenced.insert(file.remote_name);
                }
            }
            let cutoff = self.fs.status(&self.manifest_path(boundary))?.modified;

            for kind in [FileKind::Sst, FileKind::Log] {
                for status in self.fs.list(&self.root.join(kind.dir_name()))? {
                    let Some(name) = status.file_name() else {
                        continue;
                    };
                    if name.ends_with(CHANGELOG_SUFFIX)
                        || referenced.contains(name)
                        || status.modified >= cutoff
                    {
                        continue;
                    }
                    self.fs.delete(&status.path)?;
                    trace!(file = name, "deleted unreferenced remote file");
                    known.retain(|_, f| f.remote_name != name);
                    report.files_deleted.push(name.to_owned());
                }
            }
        }

        for version in versions.into_iter().filter(|v| *v < boundary) {
            self.fs.delete(&self.manifest_path(version))?;
            report.manifests_deleted.push(version);
        }
        for version in self
            .changelog_versions()?
            .into_iter()
            .filter(|v| *v < boundary)
        {
            self.fs.delete(&self.changelog_path(version))?;
            report.changelogs_deleted.push(version);
        }

        self.counters
            .files_deleted
            .fetch_add(report.files_deleted.len() as u64, Ordering::Relaxed);

        if !report.manifests_deleted.is_empty() || !report.files_deleted.is_empty() {
            info!(
                root = %self.root.display(),
                boundary,
                manifests = report.manifests_deleted.len(),
                changelogs = report.changelogs_deleted.len(),
                files = report.files_deleted.len(),
                "purged old versions"
            );
        }
        Ok(report)
    }

    // --------------------------------------------------------------------------------------------
    // Metrics
    // --------------------------------------------------------------------------------------------

    pub fn metrics(&self) -> FileManagerMetrics {
        let c = &self.counters;
        FileManagerMetrics {
            files_uploaded: c.files_uploaded.load(Ordering::Relaxed),
            bytes_uploaded: c.bytes_uploaded.load(Ordering::Relaxed),
            files_reused: c.files_reused.load(Ordering::Relaxed),
            files_downloaded: c.files_downloaded.load(Ordering::Relaxed),
            bytes_downloaded: c.bytes_downloaded.load(Ordering::Relaxed),
            files_deleted: c.files_deleted.load(Ordering::Relaxed),
        }
    }

    pub fn reset_metrics(&self) {
        let c = &self.counters;
        for counter in [
            &c.files_uploaded,
            &c.bytes_uploaded,
            &c.files_reused,
            &c.files_downloaded,
            &c.bytes_downloaded,
            &c.files_deleted,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
