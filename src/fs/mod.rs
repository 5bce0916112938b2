//! Checkpoint filesystem abstraction.
//!
//! The store never talks to durable storage directly. Every remote
//! interaction goes through [`CheckpointFs`], which models the small set of
//! operations a distributed filesystem offers: listing, status, atomic
//! create, streaming reads, rename and delete.
//!
//! [`LocalCheckpointFs`] implements the trait on top of a local directory
//! tree. Atomic creation writes into a uniquely named temporary file next to
//! the target and publishes it with a rename after `fsync`, so readers never
//! observe a partially written object.


use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::{debug, trace, warn};

const TEMP_SUFFIX: &str = ".tmp";

// ------------------------------------------------------------------------------------------------
// Types
// ------------------------------------------------------------------------------------------------

/// Metadata about one remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatus {
    /// Full path of the object.
    pub path: PathBuf,
    /// Size in bytes.
    pub len: u64,
    /// Last modification time.
    pub modified: SystemTime,
}

impl FileStatus {
    /// Final path component as UTF-8, if representable.
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|n| n.to_str())
    }
}

/// A stream whose contents become visible at `path` only after [`commit`].
///
/// Dropping the stream without committing discards everything written.
///
/// [`commit`]: AtomicOutput::commit
pub trait AtomicOutput: Write + Send {
    /// Sync and publish the written bytes.
    fn commit(self: Box<Self>) -> io::Result<()>;

    /// Discard the written bytes.
    fn cancel(self: Box<Self>) -> io::Result<()>;
}

/// Operations the store needs from durable checkpoint storage.
pub trait CheckpointFs: Send + Sync + fmt::Debug {
    /// Create `path` and all missing parents.
    fn mkdirs(&self, path: &Path) -> io::Result<()>;

    /// Whether an object or directory exists at `path`.
    fn exists(&self, path: &Path) -> io::Result<bool>;

    /// List the regular files directly under `dir`. A missing directory
    /// lists as empty.
    fn list(&self, dir: &Path) -> io::Result<Vec<FileStatus>>;

    /// Status of one object.
    fn status(&self, path: &Path) -> io::Result<FileStatus>;

    /// Open an atomic output stream for `path`.
    ///
    /// With `overwrite == false` the commit fails with
    /// [`io::ErrorKind::AlreadyExists`] if `path` exists at publish time.
    fn create_atomic(&self, path: &Path, overwrite: bool) -> io::Result<Box<dyn AtomicOutput>>;

    /// Open `path` for sequential reading.
    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Rename `from` to `to`.
    fn rename(&self, from: &Path, to: &Path, overwrite: bool) -> io::Result<()>;

    /// Delete `path`. Deleting a missing object succeeds.
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Upload a local file to `remote` without overwriting an existing object.
    fn copy_from_local(&self, local: &Path, remote: &Path) -> io::Result<u64> {
        let mut input = BufReader::new(File::open(local)?);
        let mut output = self.create_atomic(remote, false)?;
        match io::copy(&mut input, &mut output) {
            Ok(n) => {
                output.commit()?;
                Ok(n)
            }
            Err(e) => {
                if let Err(cancel_err) = output.cancel() {
                    warn!(path = %remote.display(), "failed to cancel upload: {cancel_err}");
                }
                Err(e)
            }
        }
    }

    /// Download `remote` into the local file `local`, replacing it atomically.
    fn copy_to_local(&self, remote: &Path, local: &Path) -> io::Result<u64> {
        let tmp = temp_sibling(local);
        let result = self.open(remote).and_then(|mut input| {
            let mut file = File::create(&tmp)?;
            let n = io::copy(&mut input, &mut file)?;
            file.sync_all()?;
            fs::rename(&tmp, local)?;
            Ok(n)
        });
        if result.is_err() {
            discard_file(&tmp);
        }
        result
    }
}

/// Uniquely named temporary path in the same directory as `target`.
pub(crate) fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{}{TEMP_SUFFIX}", uuid::Uuid::new_v4()))
}

// ------------------------------------------------------------------------------------------------
// Local implementation
// ------------------------------------------------------------------------------------------------

/// [`CheckpointFs`] backed by the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct LocalCheckpointFs;

impl LocalCheckpointFs {
    /// Create a new handle.
    pub fn new() -> Self {
        Self
    }
}

struct LocalAtomicOutput {
    file: Option<File>,
    tmp: PathBuf,
    target: PathBuf,
    overwrite: bool,
}

impl Write for LocalAtomicOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.write(buf),
            None => Err(io::Error::other("atomic output already closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(f) => f.flush(),
            None => Ok(()),
        }
    }
}

impl AtomicOutput for LocalAtomicOutput {
    fn commit(mut self: Box<Self>) -> io::Result<()> {
        let file = self
            .file
            .take()
            .ok_or_else(|| io::Error::other("atomic output already closed"))?;
        file.sync_all()?;
        drop(file);

        if !self.overwrite && self.target.exists() {
            discard_file(&self.tmp);
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", self.target.display()),
            ));
        }
        fs::rename(&self.tmp, &self.target)?;
        if let Some(parent) = self.target.parent() {
            sync_dir(parent);
        }
        trace!(path = %self.target.display(), "atomic output committed");
        Ok(())
    }

    fn cancel(mut self: Box<Self>) -> io::Result<()> {
        self.file.take();
        match fs::remove_file(&self.tmp) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for LocalAtomicOutput {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            debug!(path = %self.target.display(), "discarding uncommitted atomic output");
            discard_file(&self.tmp);
        }
    }
}

/// Remove a scratch file on an error path, logging anything but
/// `NotFound`.
pub(crate) fn discard_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "failed to remove file: {e}"),
    }
}

fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir)
        && let Err(e) = d.sync_all()
    {
        debug!(dir = %dir.display(), "directory sync failed: {e}");
    }
}

fn status_of(path: &Path, meta: &fs::Metadata) -> io::Result<FileStatus> {
    Ok(FileStatus {
        path: path.to_path_buf(),
        len: meta.len(),
        modified: meta.modified()?,
    })
}

impl CheckpointFs for LocalCheckpointFs {
    fn mkdirs(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        path.try_exists()
    }

    fn list(&self, dir: &Path) -> io::Result<Vec<FileStatus>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut out = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let is_temp = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_SUFFIX));
            let meta = entry.metadata()?;
            if meta.is_file() && !is_temp {
                out.push(status_of(&path, &meta)?);
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(out)
    }

    fn status(&self, path: &Path) -> io::Result<FileStatus> {
        status_of(path, &fs::metadata(path)?)
    }

    fn create_atomic(&self, path: &Path, overwrite: bool) -> io::Result<Box<dyn AtomicOutput>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_sibling(path);
        let file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
        Ok(Box::new(LocalAtomicOutput {
            file: Some(file),
            tmp,
            target: path.to_path_buf(),
            overwrite,
        }))
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(BufReader::new(File::open(path)?)))
    }

    fn rename(&self, from: &Path, to: &Path, overwrite: bool) -> io::Result<()> {
        if !overwrite && to.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", to.display()),
            ));
        }
        fs::rename(from, to)
    }

    fn delete(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
