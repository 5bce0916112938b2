use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::DedupPolicy;
use crate::file_manager::FileManager;
use crate::fs::LocalCheckpointFs;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn manager(root: &Path, policy: DedupPolicy) -> FileManager {
    FileManager::new(Arc::new(LocalCheckpointFs::new()), root, policy)
}

/// Replace the contents of `dir` with the given files.
pub fn write_checkpoint(dir: &Path, files: &[(&str, &[u8])]) -> PathBuf {
    let _ = fs::remove_dir_all(dir);
    fs::create_dir_all(dir).unwrap();
    for (name, contents) in files {
        fs::write(dir.join(name), contents).unwrap();
    }
    dir.to_path_buf()
}

/// Names of regular files in `dir`, sorted.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap())
            .filter(|e| e.file_type().unwrap().is_file())
            .map(|e| e.file_name().into_string().unwrap())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}
