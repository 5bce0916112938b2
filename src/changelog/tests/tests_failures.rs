#[cfg(test)]
mod tests {
    use std::io::{self, Read, Write};
    use std::path::Path;

    use crate::changelog::{ChangelogError, ChangelogFormat, ChangelogWriter};
    use crate::fs::{AtomicOutput, CheckpointFs, FileStatus, LocalCheckpointFs};
    use tempfile::TempDir;

    /// Local filesystem whose atomic outputs reject every write.
    #[derive(Debug, Default)]
    struct BrokenWrites {
        inner: LocalCheckpointFs,
    }

    struct BrokenOutput(Box<dyn AtomicOutput>);

    impl Write for BrokenOutput {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            self.0.flush()
        }
    }

    impl AtomicOutput for BrokenOutput {
        fn commit(self: Box<Self>) -> io::Result<()> {
            self.0.commit()
        }

        fn cancel(self: Box<Self>) -> io::Result<()> {
            self.0.cancel()
        }
    }

    impl CheckpointFs for BrokenWrites {
        fn mkdirs(&self, path: &Path) -> io::Result<()> {
            self.inner.mkdirs(path)
        }

        fn exists(&self, path: &Path) -> io::Result<bool> {
            self.inner.exists(path)
        }

        fn list(&self, dir: &Path) -> io::Result<Vec<FileStatus>> {
            self.inner.list(dir)
        }

        fn status(&self, path: &Path) -> io::Result<FileStatus> {
            self.inner.status(path)
        }

        fn create_atomic(
            &self,
            path: &Path,
            overwrite: bool,
        ) -> io::Result<Box<dyn AtomicOutput>> {
            Ok(Box::new(BrokenOutput(self.inner.create_atomic(path, overwrite)?)))
        }

        fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
            self.inner.open(path)
        }

        fn rename(&self, from: &Path, to: &Path, overwrite: bool) -> io::Result<()> {
            self.inner.rename(from, to, overwrite)
        }

        fn delete(&self, path: &Path) -> io::Result<()> {
            self.inner.delete(path)
        }
    }

    /// # Scenario
    /// The first buffered chunk cannot be written.
    ///
    /// # Actions
    /// 1. Put records until one of them fails.
    /// 2. Put once more, then commit.
    ///
    /// # Expected behavior
    /// The failing put returns the I/O error. Afterwards the writer reports
    /// itself failed, every put and the commit return `Failed`, and nothing
    /// is published at the path.
    #[test]
    fn failed_chunk_write_poisons_the_writer() {
        let tmp = TempDir::new().unwrap();
        let fs = BrokenWrites::default();
        let path = tmp.path().join("3.changelog");

        let mut writer =
            ChangelogWriter::create(&fs, &path, ChangelogFormat::MultiFamily).unwrap();
        let value = vec![7u8; 4096];
        let mut first = None;
        for i in 0..64u32 {
            if let Err(e) = writer.put(&i.to_be_bytes(), &value, "default") {
                first = Some(e);
                break;
            }
        }
        assert!(matches!(first, Some(ChangelogError::Io(_))));
        assert!(writer.is_failed());
        assert!(writer.is_finalized());

        let err = writer.put(b"late", b"v", "default").unwrap_err();
        assert!(matches!(err, ChangelogError::Failed { .. }), "{err}");
        let err = writer.commit().unwrap_err();
        assert!(matches!(err, ChangelogError::Failed { .. }), "{err}");

        assert!(!fs.exists(&path).unwrap());
    }
}
