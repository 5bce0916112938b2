#[cfg(test)]
mod tests {
    use crate::changelog::{
        ChangelogError, ChangelogFormat, ChangelogReader, ChangelogRecord, ChangelogWriter,
        RecordKind,
    };
    use crate::fs::{CheckpointFs, LocalCheckpointFs};
    use tempfile::TempDir;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn read_back(fs: &LocalCheckpointFs, path: &std::path::Path) -> Vec<ChangelogRecord> {
        ChangelogReader::open(fs, path)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    /// # Scenario
    /// Records written in a sequence are read back in the same sequence.
    ///
    /// # Actions
    /// 1. Put, delete and put again under the same key.
    /// 2. Commit and open a reader.
    ///
    /// # Expected behavior
    /// The reader yields the three records in order, then `None`.
    #[test]
    fn records_are_read_back_in_order() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fs = LocalCheckpointFs::new();
        let path = tmp.path().join("logs/1.changelog");

        let mut writer = ChangelogWriter::create(&fs, &path, ChangelogFormat::Legacy).unwrap();
        writer.put(b"k", b"v1", "default").unwrap();
        writer.delete(b"k", "default").unwrap();
        writer.put(b"k", b"v2", "default").unwrap();
        assert_eq!(writer.records(), 3);
        writer.commit().unwrap();

        let records = read_back(&fs, &path);
        assert_eq!(
            records,
            vec![
                ChangelogRecord::put(b"k", b"v1", "default"),
                ChangelogRecord::delete(b"k", "default"),
                ChangelogRecord::put(b"k", b"v2", "default"),
            ]
        );
    }

    #[test]
    fn empty_changelog_is_valid() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fs = LocalCheckpointFs::new();
        let path = tmp.path().join("7.changelog");

        let mut writer =
            ChangelogWriter::create(&fs, &path, ChangelogFormat::MultiFamily).unwrap();
        writer.commit().unwrap();

        let mut reader = ChangelogReader::open(&fs, &path).unwrap();
        assert_eq!(reader.format(), ChangelogFormat::MultiFamily);
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());
    }

    /// # Scenario
    /// A writer is aborted, or dropped without commit.
    ///
    /// # Expected behavior
    /// No changelog is published at the destination path.
    #[test]
    fn abort_and_drop_publish_nothing() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fs = LocalCheckpointFs::new();
        let aborted = tmp.path().join("1.changelog");
        let dropped = tmp.path().join("2.changelog");

        let mut writer = ChangelogWriter::create(&fs, &aborted, ChangelogFormat::Legacy).unwrap();
        writer.put(b"a", b"1", "default").unwrap();
        writer.abort();
        writer.abort();
        assert!(writer.is_finalized());

        {
            let mut writer =
                ChangelogWriter::create(&fs, &dropped, ChangelogFormat::Legacy).unwrap();
            writer.put(b"a", b"1", "default").unwrap();
        }

        assert!(!fs.exists(&aborted).unwrap());
        assert!(!fs.exists(&dropped).unwrap());
        assert!(fs.list(tmp.path()).unwrap().is_empty());
    }

    /// # Scenario
    /// Mutators and commit are called after the writer was finalized.
    ///
    /// # Expected behavior
    /// Every call fails with `UnsupportedOperation` naming the operation.
    #[test]
    fn finalized_writer_rejects_everything() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fs = LocalCheckpointFs::new();
        let path = tmp.path().join("3.changelog");

        let mut writer =
            ChangelogWriter::create(&fs, &path, ChangelogFormat::MultiFamily).unwrap();
        writer.put(b"a", b"1", "default").unwrap();
        writer.commit().unwrap();

        for (op, result) in [
            ("put", writer.put(b"b", b"2", "default")),
            ("delete", writer.delete(b"b", "default")),
            ("merge", writer.merge(b"b", b"2", "default")),
            ("commit", writer.commit()),
        ] {
            match result {
                Err(ChangelogError::UnsupportedOperation { operation, .. }) => {
                    assert_eq!(operation, op)
                }
                other => panic!("{op}: expected UnsupportedOperation, got {other:?}"),
            }
        }

        assert_eq!(read_back(&fs, &path).len(), 1);
    }

    /// # Scenario
    /// A version is re-executed and its changelog written a second time.
    ///
    /// # Expected behavior
    /// The second commit replaces the first file.
    #[test]
    fn recommit_replaces_existing_changelog() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fs = LocalCheckpointFs::new();
        let path = tmp.path().join("4.changelog");

        let mut first = ChangelogWriter::create(&fs, &path, ChangelogFormat::Legacy).unwrap();
        first.put(b"old", b"1", "default").unwrap();
        first.commit().unwrap();

        let mut second = ChangelogWriter::create(&fs, &path, ChangelogFormat::Legacy).unwrap();
        second.put(b"new", b"2", "default").unwrap();
        second.commit().unwrap();

        let records = read_back(&fs, &path);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, b"new");
        assert_eq!(records[0].kind, RecordKind::Put);
    }

    #[test]
    fn many_records_cross_the_flush_threshold() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fs = LocalCheckpointFs::new();
        let path = tmp.path().join("5.changelog");

        let mut writer =
            ChangelogWriter::create(&fs, &path, ChangelogFormat::MultiFamily).unwrap();
        let value = vec![0x5A; 512];
        for i in 0..1_000u32 {
            writer.put(&i.to_be_bytes(), &value, "default").unwrap();
        }
        let written = writer.bytes_written();
        writer.commit().unwrap();

        assert_eq!(fs.status(&path).unwrap().len, written);
        let records = read_back(&fs, &path);
        assert_eq!(records.len(), 1_000);
        assert_eq!(records[999].key, 999u32.to_be_bytes().to_vec());
    }

    /// # Scenario
    /// The reported size is the size of the file a commit would publish.
    ///
    /// # Actions
    /// 1. Commit an empty changelog and one with a single record, reading
    ///    `bytes_written` before each commit.
    ///
    /// # Expected behavior
    /// Both published files are exactly as long as reported, end marker
    /// included.
    #[test]
    fn bytes_written_counts_the_end_marker() {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let fs = LocalCheckpointFs::new();

        let empty = tmp.path().join("1.changelog");
        let mut writer = ChangelogWriter::create(&fs, &empty, ChangelogFormat::Legacy).unwrap();
        let reported = writer.bytes_written();
        writer.commit().unwrap();
        assert_eq!(fs.status(&empty).unwrap().len, reported);
        assert_eq!(writer.bytes_written(), reported);

        let single = tmp.path().join("2.changelog");
        let mut writer =
            ChangelogWriter::create(&fs, &single, ChangelogFormat::MultiFamily).unwrap();
        writer.put(b"k", b"v", "default").unwrap();
        let reported = writer.bytes_written();
        writer.commit().unwrap();
        assert_eq!(fs.status(&single).unwrap().len, reported);
    }
}
