#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;
    use std::thread;
    use std::time::Duration;

    use tempfile::TempDir;

    use super::super::helpers::{file_names, init_tracing, manager, write_checkpoint};
    use crate::config::DedupPolicy;
    use crate::file_manager::{FileManager, PurgeReport};

    /// Filesystem timestamps are coarse; keep uploads and manifests apart.
    fn tick() {
        thread::sleep(Duration::from_millis(30));
    }

    fn write_changelogs(fm: &FileManager, versions: impl IntoIterator<Item = u64>) {
        for v in versions {
            let path = fm.changelog_path(v);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"changelog").unwrap();
        }
    }

    /// Snapshots at 1, 3 and 5 sharing some files, changelogs 1..=5.
    fn three_snapshots(tmp: &Path) -> FileManager {
        let fm = manager(&tmp.join("remote"), DedupPolicy::NameAndSize);
        let dir = tmp.join("ckpt");

        write_checkpoint(&dir, &[("000001.sst", b"a")]);
        fm.save_checkpoint(&dir, 1, 1).unwrap();
        tick();
        write_checkpoint(&dir, &[("000001.sst", b"a"), ("000002.sst", b"bb")]);
        fm.save_checkpoint(&dir, 3, 2).unwrap();
        tick();
        write_checkpoint(&dir, &[("000002.sst", b"bb"), ("000003.sst", b"ccc")]);
        fm.save_checkpoint(&dir, 5, 2).unwrap();
        write_changelogs(&fm, 1..=5);
        fm
    }

    #[test]
    fn nothing_to_purge_without_snapshots() {
        let tmp = TempDir::new().unwrap();
        let fm = manager(&tmp.path().join("remote"), DedupPolicy::NameAndSize);
        write_changelogs(&fm, 1..=3);

        assert_eq!(fm.delete_old_versions(2).unwrap(), PurgeReport::default());
        assert_eq!(fm.changelog_versions().unwrap(), [1, 2, 3]);
    }

    /// # Scenario
    /// Snapshots exist at 1, 3 and 5 with changelogs 1..=5; three versions
    /// are retained.
    ///
    /// # Expected behavior
    /// The boundary is snapshot 3: snapshots `{3, 5}` and changelogs
    /// `{3, 4, 5}` remain, and every file a kept manifest names survives.
    #[test]
    fn retains_nearest_snapshot_below_window() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fm = three_snapshots(tmp.path());

        let report = fm.delete_old_versions(3).unwrap();
        assert_eq!(report.boundary, Some(3));
        assert_eq!(report.manifests_deleted, [1]);
        assert_eq!(report.changelogs_deleted, [1, 2]);
        assert!(report.files_deleted.is_empty());

        assert_eq!(fm.snapshot_versions().unwrap(), [3, 5]);
        assert_eq!(fm.changelog_versions().unwrap(), [3, 4, 5]);
        assert_eq!(fm.latest_snapshot_at_or_below(4).unwrap(), Some(3));
        assert_eq!(fm.latest_snapshot_at_or_below(2).unwrap(), None);

        for version in [3, 5] {
            let dest = tmp.path().join(format!("load-{version}"));
            fm.load_checkpoint(version, &dest).unwrap();
        }
    }

    #[test]
    fn window_reaching_past_oldest_snapshot_keeps_everything() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fm = three_snapshots(tmp.path());

        assert_eq!(fm.delete_old_versions(10).unwrap(), PurgeReport::default());

        let report = fm.delete_old_versions(4).unwrap();
        assert_eq!(report.boundary, Some(1));
        assert!(report.manifests_deleted.is_empty());
        assert!(report.changelogs_deleted.is_empty());
        assert_eq!(fm.snapshot_versions().unwrap(), [1, 3, 5]);
    }

    /// # Scenario
    /// Only the newest snapshot is retained.
    ///
    /// # Expected behavior
    /// The remote copy of `000001.sst`, which only older manifests named,
    /// is deleted; saving that file again uploads a fresh copy.
    #[test]
    fn deletes_unreferenced_files_older_than_boundary() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fm = three_snapshots(tmp.path());
        let remote = tmp.path().join("remote");
        assert_eq!(file_names(&remote.join("SSTs")).len(), 3);

        let report = fm.delete_old_versions(1).unwrap();
        assert_eq!(report.boundary, Some(5));
        assert_eq!(report.manifests_deleted, [1, 3]);
        assert_eq!(report.changelogs_deleted, [1, 2, 3, 4]);
        assert_eq!(report.files_deleted.len(), 1);
        assert!(report.files_deleted[0].starts_with("000001-"));

        let left = file_names(&remote.join("SSTs"));
        assert_eq!(left.len(), 2);
        assert!(left.iter().all(|n| !n.starts_with("000001-")));
        assert_eq!(fm.metrics().files_deleted, 1);

        let dir = write_checkpoint(&tmp.path().join("ckpt"), &[("000001.sst", b"a")]);
        assert_eq!(fm.save_checkpoint(&dir, 6, 1).unwrap().files_uploaded, 1);
    }

    #[test]
    fn single_snapshot_never_deletes_files() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let remote = tmp.path().join("remote");
        let fm = manager(&remote, DedupPolicy::NameAndSize);

        fs::create_dir_all(remote.join("SSTs")).unwrap();
        fs::write(remote.join("SSTs/orphan-1.sst"), b"orphan").unwrap();
        tick();
        let dir = write_checkpoint(&tmp.path().join("ckpt"), &[("000001.sst", b"a")]);
        fm.save_checkpoint(&dir, 4, 1).unwrap();

        let report = fm.delete_old_versions(1).unwrap();
        assert_eq!(report.boundary, Some(4));
        assert!(report.files_deleted.is_empty());
        assert!(remote.join("SSTs/orphan-1.sst").exists());
    }

    /// # Scenario
    /// An unreferenced file appears after the boundary manifest was written,
    /// as an upload in progress would.
    ///
    /// # Expected behavior
    /// The file is kept.
    #[test]
    fn keeps_files_newer_than_boundary_manifest() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fm = three_snapshots(tmp.path());
        let in_flight = tmp.path().join("remote/SSTs/000009-inflight.sst");
        tick();
        fs::write(&in_flight, b"new").unwrap();

        let report = fm.delete_old_versions(1).unwrap();
        assert!(!report.files_deleted.iter().any(|n| n == "000009-inflight.sst"));
        assert!(in_flight.exists());
    }
}
