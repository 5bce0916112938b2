#[cfg(test)]
mod tests {
    use crate::changelog::DEFAULT_COLUMN_FAMILY as CF;
    use crate::engine::Engine;
    use crate::engine::tests::helpers::*;
    use tempfile::TempDir;

    /// # Scenario
    /// Writes overflow a 256-byte memtable repeatedly.
    ///
    /// # Expected behavior
    /// With the default `max_write_buffer_number` of 2, every freeze flushes
    /// synchronously: no frozen memtable lingers and data files accumulate.
    #[test]
    fn full_memtables_flush_synchronously() {
        let dir = TempDir::new().unwrap();
        let engine = small_buffer(dir.path());

        for i in 0..200 {
            engine.put(CF, &key(i), &value(i)).unwrap();
        }
        let metrics = engine.metrics();
        assert_eq!(metrics.frozen_memtables, 0);
        assert!(metrics.live_files > 10, "got {} files", metrics.live_files);
        assert!(metrics.flush_bytes > 0);
        assert!(metrics.bytes_written >= metrics.flush_bytes);

        for i in 0..200 {
            assert_eq!(engine.get(CF, &key(i)).unwrap(), Some(value(i)));
        }
    }

    #[test]
    fn larger_write_buffer_number_keeps_frozen_memtables() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(256);
        opts.max_write_buffer_number = 4;
        let engine = Engine::open(dir.path(), opts).unwrap();

        // ~5 entries per memtable; 12 entries freeze twice.
        for i in 0..12 {
            engine.put(CF, &key(i), &value(i)).unwrap();
        }
        let metrics = engine.metrics();
        assert_eq!(metrics.live_files, 0);
        assert_eq!(metrics.frozen_memtables, 2);

        engine.flush().unwrap();
        let metrics = engine.metrics();
        assert_eq!(metrics.frozen_memtables, 0);
        assert_eq!(metrics.memtable_bytes, 0);
        assert_eq!(metrics.live_files, 3);
        for i in 0..12 {
            assert_eq!(engine.get(CF, &key(i)).unwrap(), Some(value(i)));
        }
    }

    /// # Scenario
    /// Only tombstones are flushed into an empty family.
    ///
    /// # Expected behavior
    /// No data file is produced: there is nothing older to shadow.
    #[test]
    fn tombstones_without_older_data_are_not_written() {
        let dir = TempDir::new().unwrap();
        let engine = memtable_only(dir.path());

        engine.delete(CF, b"a").unwrap();
        engine.delete(CF, b"b").unwrap();
        engine.flush().unwrap();

        assert_eq!(engine.metrics().live_files, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn flush_of_empty_engine_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let engine = memtable_only(dir.path());
        engine.flush().unwrap();
        engine.flush().unwrap();
        assert_eq!(engine.metrics().live_files, 0);
    }

    #[test]
    fn leftover_temporary_files_are_removed_on_open() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("000007.sst.tmp"), b"partial").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let engine = memtable_only(dir.path());
        assert!(!dir.path().join("000007.sst.tmp").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert_eq!(engine.metrics().live_files, 0);
    }

    #[test]
    fn new_files_continue_numbering_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let engine = memtable_only(dir.path());
            engine.put(CF, b"a", b"1").unwrap();
            engine.flush().unwrap();
            engine.put(CF, b"b", b"2").unwrap();
            engine.flush().unwrap();
        }
        let engine = memtable_only(dir.path());
        engine.put(CF, b"c", b"3").unwrap();
        engine.flush().unwrap();

        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, ["000001.sst", "000002.sst", "000003.sst"]);
    }
}
