//! Checkpoint manifest.
//!
//! A manifest names every remote file a snapshot consists of. It is stored as
//! a format line followed by one JSON document:
//!
//! ```text
//! v1
//! {"sstFiles":[{"localFileName":"000004.sst","dfsSstFileName":"000004-<uuid>.sst","sizeBytes":1024}],"numKeys":12}
//! ```
//!
//! `logFiles` is left out when there are none and read as empty when absent.
//! A per-file `checksum` appears only when content checksums are enabled.

use serde::{Deserialize, Serialize};

use super::FileManagerError;

/// Format line every manifest starts with.
pub const MANIFEST_FORMAT: &str = "v1";

/// Where a checkpoint file lives remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Engine data file, stored under `SSTs/`.
    Sst,
    /// Any other engine file, stored under `logs/`.
    Log,
}

impl FileKind {
    /// Kind of a local file, decided by its extension.
    pub fn of(file_name: &str) -> Self {
        if file_name.ends_with(".sst") {
            FileKind::Sst
        } else {
            FileKind::Log
        }
    }

    /// Remote directory, relative to the store root.
    pub fn dir_name(self) -> &'static str {
        match self {
            FileKind::Sst => "SSTs",
            FileKind::Log => "logs",
        }
    }
}

/// One file of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointFile {
    /// Name inside the engine directory.
    pub local_name: String,
    /// Unique name of the remote copy.
    pub remote_name: String,
    /// Size of both copies.
    pub size_bytes: u64,
    /// CRC32 of the contents, when recorded.
    pub checksum: Option<u32>,
    pub kind: FileKind,
}

/// Contents of `<version>.manifest`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointManifest {
    pub files: Vec<CheckpointFile>,
    /// Approximate number of live keys at this version.
    pub num_keys: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SstFileJson {
    local_file_name: String,
    dfs_sst_file_name: String,
    size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogFileJson {
    local_file_name: String,
    dfs_log_file_name: String,
    size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestJson {
    sst_files: Vec<SstFileJson>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    log_files: Vec<LogFileJson>,
    num_keys: u64,
}

impl CheckpointManifest {
    /// Data files, in manifest order.
    pub fn sst_files(&self) -> impl Iterator<Item = &CheckpointFile> {
        self.files.iter().filter(|f| f.kind == FileKind::Sst)
    }

    /// Non-data files, in manifest order.
    pub fn log_files(&self) -> impl Iterator<Item = &CheckpointFile> {
        self.files.iter().filter(|f| f.kind == FileKind::Log)
    }

    /// Sum of all file sizes.
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.size_bytes).sum()
    }

    /// Serialize to the on-storage form.
    pub fn encode(&self) -> Result<Vec<u8>, FileManagerError> {
        let json = ManifestJson {
            sst_files: self
                .sst_files()
                .map(|f| SstFileJson {
                    local_file_name: f.local_name.clone(),
                    dfs_sst_file_name: f.remote_name.clone(),
                    size_bytes: f.size_bytes,
                    checksum: f.checksum,
                })
                .collect(),
            log_files: self
                .log_files()
                .map(|f| LogFileJson {
                    local_file_name: f.local_name.clone(),
                    dfs_log_file_name: f.remote_name.clone(),
                    size_bytes: f.size_bytes,
                    checksum: f.checksum,
                })
                .collect(),
            num_keys: self.num_keys,
        };

        let mut out = Vec::with_capacity(64 + 96 * self.files.len());
        out.extend_from_slice(MANIFEST_FORMAT.as_bytes());
        out.push(b'\n');
        serde_json::to_writer(&mut out, &json)?;
        Ok(out)
    }

    /// Parse the on-storage form.
    pub fn decode(bytes: &[u8]) -> Result<Self, FileManagerError> {
        let (header, body) = match bytes.iter().position(|b| *b == b'\n') {
            Some(pos) => (&bytes[..pos], &bytes[pos + 1..]),
            None => (bytes, &[][..]),
        };
        let header = String::from_utf8_lossy(header).trim().to_owned();
        if header != MANIFEST_FORMAT {
            return Err(FileManagerError::UnsupportedCheckpointVersion {
                expected: MANIFEST_FORMAT,
                actual: header,
            });
        }

        let json: ManifestJson = serde_json::from_slice(body)?;
        let mut files = Vec::with_capacity(json.sst_files.len() + json.log_files.len());
        files.extend(json.sst_files.into_iter().map(|f| CheckpointFile {
            local_name: f.local_file_name,
            remote_name: f.dfs_sst_file_name,
            size_bytes: f.size_bytes,
            checksum: f.checksum,
            kind: FileKind::Sst,
        }));
        files.extend(json.log_files.into_iter().map(|f| CheckpointFile {
            local_name: f.local_file_name,
            remote_name: f.dfs_log_file_name,
            size_bytes: f.size_bytes,
            checksum: f.checksum,
            kind: FileKind::Log,
        }));

        Ok(Self {
            files,
            num_keys: json.num_keys,
        })
    }
}
