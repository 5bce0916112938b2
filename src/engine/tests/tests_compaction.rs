#[cfg(test)]
mod tests {
    use crate::changelog::DEFAULT_COLUMN_FAMILY as CF;
    use crate::engine::tests::helpers::*;
    use tempfile::TempDir;

    /// # Scenario
    /// Many small files with overwrites and deletes are fully compacted.
    ///
    /// # Expected behavior
    /// Each family ends with a single file without tombstones, reads are
    /// unchanged, and obsolete files are gone from the directory.
    #[test]
    fn full_compaction_merges_to_one_file_per_family() {
        let dir = TempDir::new().unwrap();
        let engine = small_buffer(dir.path());
        for i in 0..100 {
            engine.put(CF, &key(i), &value(i)).unwrap();
            engine.put("other", &key(i), &value(i)).unwrap();
        }
        for i in (0..100).step_by(2) {
            engine.delete(CF, &key(i)).unwrap();
        }
        let before = collect(engine.iter(CF).unwrap());
        assert!(engine.metrics().live_files > 2);

        engine.compact().unwrap();

        let metrics = engine.metrics();
        assert_eq!(metrics.live_files, 2);
        assert_eq!(metrics.compaction.count, 1);
        assert!(metrics.compaction_bytes_read > metrics.compaction_bytes_written);
        assert_eq!(collect(engine.iter(CF).unwrap()), before);
        assert_eq!(before.len(), 50);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[test]
    fn compaction_of_fully_deleted_family_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let engine = memtable_only(dir.path());
        engine.put(CF, b"a", b"1").unwrap();
        engine.flush().unwrap();
        engine.delete(CF, b"a").unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.metrics().live_files, 2);

        engine.compact().unwrap();
        assert_eq!(engine.metrics().live_files, 0);
        assert_eq!(engine.get(CF, b"a").unwrap(), None);
    }

    #[test]
    fn compaction_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = small_buffer(dir.path());
            for i in 0..40 {
                engine.put(CF, &key(i), &value(i)).unwrap();
            }
            engine.compact().unwrap();
        }
        let engine = small_buffer(dir.path());
        assert_eq!(engine.metrics().live_files, 1);
        for i in 0..40 {
            assert_eq!(engine.get(CF, &key(i)).unwrap(), Some(value(i)));
        }
    }
}
