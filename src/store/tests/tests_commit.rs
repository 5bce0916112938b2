#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::super::helpers::{changelog_config, commit_puts, open, read, snapshot_config};
    use crate::config::StoreConfig;
    use crate::error::CommitStage;

    /// # Scenario
    /// In snapshot mode each commit uploads a full snapshot synchronously.
    ///
    /// # Expected behavior
    /// The manifest exists right after commit, the local checkpoint
    /// directory is cleaned up and the upload time is recorded.
    #[test]
    fn snapshot_mode_uploads_on_commit() {
        let tmp = TempDir::new().unwrap();
        let store = open(tmp.path(), snapshot_config());
        commit_puts(&store, 0, &[("a", "1")]);

        let manifest = store.file_manager().read_manifest(1).unwrap();
        assert_eq!(manifest.num_keys, 1);
        assert!(manifest.sst_files().next().is_some());

        let checkpoints = tmp.path().join("local").join("checkpoints");
        let leftovers = std::fs::read_dir(&checkpoints)
            .map(|entries| entries.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);

        let metrics = store.metrics();
        assert_eq!(metrics.pending_snapshots, 0);
        assert!(metrics.last_commit.get(CommitStage::FileSync) > Duration::ZERO);
        assert_eq!(metrics.file_manager.files_uploaded, manifest.files.len() as u64);
    }

    /// # Scenario
    /// In changelog mode a snapshot is captured once enough versions have
    /// accumulated since the last one.
    ///
    /// # Starting environment
    /// `minDeltasForSnapshot = 2`.
    ///
    /// # Expected behavior
    /// Version 1 publishes only a changelog; version 2 also leaves a
    /// pending local snapshot; nothing is uploaded before maintenance.
    #[test]
    fn changelog_mode_snapshots_after_min_deltas() {
        let tmp = TempDir::new().unwrap();
        let store = open(
            tmp.path(),
            StoreConfig {
                min_deltas_for_snapshot: 2,
                ..changelog_config()
            },
        );

        commit_puts(&store, 0, &[("a", "1")]);
        assert_eq!(store.metrics().pending_snapshots, 0);

        commit_puts(&store, 1, &[("b", "1")]);
        assert_eq!(store.metrics().pending_snapshots, 1);
        assert!(tmp.path().join("local/checkpoints/2").is_dir());

        let files = store.file_manager();
        assert_eq!(files.changelog_versions().unwrap(), [1, 2]);
        assert!(files.snapshot_versions().unwrap().is_empty());

        commit_puts(&store, 2, &[("c", "1")]);
        assert_eq!(store.metrics().pending_snapshots, 1);
        assert!(tmp.path().join("local/checkpoints/2").is_dir());
    }

    /// # Scenario
    /// The changelog record threshold triggers a snapshot before the
    /// version threshold does.
    ///
    /// # Expected behavior
    /// Two records stay below the threshold of three; the third record in
    /// the next version triggers the snapshot.
    #[test]
    fn record_threshold_triggers_snapshot() {
        let tmp = TempDir::new().unwrap();
        let store = open(
            tmp.path(),
            StoreConfig {
                min_deltas_for_snapshot: 100,
                snapshot_changelog_records: 3,
                ..changelog_config()
            },
        );

        commit_puts(&store, 0, &[("a", "1"), ("b", "1")]);
        assert_eq!(store.metrics().pending_snapshots, 0);
        commit_puts(&store, 1, &[("c", "1")]);
        assert_eq!(store.metrics().pending_snapshots, 1);
    }

    #[test]
    fn newer_pending_snapshot_replaces_older() {
        let tmp = TempDir::new().unwrap();
        let store = open(
            tmp.path(),
            StoreConfig {
                min_deltas_for_snapshot: 1,
                ..changelog_config()
            },
        );

        commit_puts(&store, 0, &[("a", "1")]);
        commit_puts(&store, 1, &[("a", "2")]);
        assert_eq!(store.metrics().pending_snapshots, 1);
        assert!(!tmp.path().join("local/checkpoints/1").exists());
        assert!(tmp.path().join("local/checkpoints/2").is_dir());
    }

    #[test]
    fn compact_on_commit_keeps_data() {
        let tmp = TempDir::new().unwrap();
        let store = open(
            tmp.path(),
            StoreConfig {
                compact_on_commit: true,
                ..snapshot_config()
            },
        );
        commit_puts(&store, 0, &[("a", "1"), ("b", "1")]);
        let mut session = store.load(1).unwrap();
        session.delete(b"a").unwrap();
        session.commit().unwrap();

        assert_eq!(read(&store, 2, "a"), None);
        assert_eq!(read(&store, 2, "b").as_deref(), Some("1"));
        assert_eq!(read(&store, 1, "a").as_deref(), Some("1"));
    }

    /// # Scenario
    /// Loading an older version drops a pending snapshot of a newer one.
    ///
    /// # Expected behavior
    /// The pending snapshot of version 2 is discarded once version 1 is
    /// loaded for rewriting.
    #[test]
    fn loading_older_version_discards_newer_pending() {
        let tmp = TempDir::new().unwrap();
        let store = open(
            tmp.path(),
            StoreConfig {
                min_deltas_for_snapshot: 2,
                ..changelog_config()
            },
        );
        commit_puts(&store, 0, &[("a", "1")]);
        commit_puts(&store, 1, &[("a", "2")]);
        assert_eq!(store.metrics().pending_snapshots, 1);

        assert_eq!(read(&store, 1, "a").as_deref(), Some("1"));
        assert_eq!(store.metrics().pending_snapshots, 0);
        assert!(!tmp.path().join("local/checkpoints/2").exists());
    }
}
