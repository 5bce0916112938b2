#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use tempfile::TempDir;

    use super::super::helpers::{
        changelog_config, commit_puts, open, open_at, read, unique_identity,
    };
    use crate::config::StoreConfig;

    fn every_version() -> StoreConfig {
        StoreConfig {
            min_deltas_for_snapshot: 1,
            ..changelog_config()
        }
    }

    /// # Scenario
    /// Maintenance uploads the pending snapshot and later loads start from
    /// it.
    ///
    /// # Actions
    /// 1. Commit versions 1 and 2 with `minDeltasForSnapshot = 2`.
    /// 2. Run maintenance, then commit version 3.
    /// 3. Load version 3 in a fresh instance.
    ///
    /// # Expected behavior
    /// Snapshot 2 is uploaded and its local copy removed; the fresh
    /// instance restores snapshot 2 and replays changelog 3 only.
    #[test]
    fn uploads_pending_snapshot() {
        let tmp = TempDir::new().unwrap();
        let identity = unique_identity();
        let config = StoreConfig {
            min_deltas_for_snapshot: 2,
            ..changelog_config()
        };
        let store = open_at(tmp.path(), "a", identity.clone(), config.clone());
        commit_puts(&store, 0, &[("a", "1")]);
        commit_puts(&store, 1, &[("b", "2")]);

        let report = store.do_maintenance();
        assert_eq!(report.failures, 0);
        let uploaded = report.uploaded.unwrap();
        assert_eq!(uploaded.version, 2);
        assert_eq!(uploaded.manifest.num_keys, 2);
        assert_eq!(store.metrics().pending_snapshots, 0);
        assert!(!tmp.path().join("a/checkpoints/2").exists());
        assert_eq!(store.file_manager().snapshot_versions().unwrap(), [2]);

        commit_puts(&store, 2, &[("c", "3")]);

        let fresh = open_at(tmp.path(), "b", identity, config);
        assert_eq!(read(&fresh, 3, "a").as_deref(), Some("1"));
        assert_eq!(read(&fresh, 3, "c").as_deref(), Some("3"));
        assert_eq!(fresh.metrics().num_committed_keys, Some(3));
    }

    #[test]
    fn nothing_pending_is_a_noop() {
        let tmp = TempDir::new().unwrap();
        let store = open(tmp.path(), changelog_config());
        commit_puts(&store, 0, &[("a", "1")]);

        let report = store.do_maintenance();
        assert!(report.uploaded.is_none());
        assert_eq!(report.purged, Some(Default::default()));
        assert_eq!(report.failures, 0);
    }

    /// # Scenario
    /// Retention keeps the newest versions and the snapshot they build on.
    ///
    /// # Starting environment
    /// Snapshots uploaded at every version 1 to 4, two versions retained.
    ///
    /// # Expected behavior
    /// Snapshots and changelogs below 3 are purged and version 3 still
    /// loads.
    #[test]
    fn purges_outside_retention() {
        let tmp = TempDir::new().unwrap();
        let store = open(
            tmp.path(),
            StoreConfig {
                min_versions_to_retain: 2,
                ..every_version()
            },
        );
        for v in 0..4 {
            commit_puts(&store, v, &[("k", "v")]);
            store.do_maintenance();
            thread::sleep(Duration::from_millis(30));
        }

        let files = store.file_manager();
        assert_eq!(files.snapshot_versions().unwrap(), [3, 4]);
        assert_eq!(files.changelog_versions().unwrap(), [3, 4]);
        assert_eq!(read(&store, 3, "k").as_deref(), Some("v"));
    }

    /// # Scenario
    /// The background thread uploads pending snapshots on its own.
    ///
    /// # Expected behavior
    /// Within a second of the commit the snapshot is uploaded; stopping
    /// the handle joins the thread.
    #[test]
    fn background_thread_uploads() {
        let tmp = TempDir::new().unwrap();
        let store = open(tmp.path(), every_version());
        let handle = store
            .spawn_maintenance(Duration::from_millis(10))
            .unwrap();

        commit_puts(&store, 0, &[("a", "1")]);

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.file_manager().snapshot_versions().unwrap().is_empty() {
            assert!(Instant::now() < deadline, "snapshot was never uploaded");
            thread::sleep(Duration::from_millis(10));
        }
        handle.stop();

        assert_eq!(store.file_manager().snapshot_versions().unwrap(), [1]);
    }

    #[test]
    fn closed_store_skips_maintenance() {
        let tmp = TempDir::new().unwrap();
        let store = open(tmp.path(), every_version());
        commit_puts(&store, 0, &[("a", "1")]);
        store.close().unwrap();

        let report = store.do_maintenance();
        assert!(report.uploaded.is_none());
        assert!(report.purged.is_none());
        assert!(store.file_manager().snapshot_versions().unwrap().is_empty());
    }
}
