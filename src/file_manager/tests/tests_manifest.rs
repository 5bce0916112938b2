#[cfg(test)]
mod tests {
    use crate::file_manager::{
        CheckpointFile, CheckpointManifest, FileKind, FileManagerError, MANIFEST_FORMAT,
    };

    fn sst(local: &str, remote: &str, size: u64) -> CheckpointFile {
        CheckpointFile {
            local_name: local.into(),
            remote_name: remote.into(),
            size_bytes: size,
            checksum: None,
            kind: FileKind::Sst,
        }
    }

    #[test]
    fn encodes_header_and_omits_empty_log_files() {
        let manifest = CheckpointManifest {
            files: vec![sst("000001.sst", "000001-a.sst", 10)],
            num_keys: 3,
        };
        let text = String::from_utf8(manifest.encode().unwrap()).unwrap();

        assert_eq!(
            text,
            "v1\n{\"sstFiles\":[{\"localFileName\":\"000001.sst\",\
             \"dfsSstFileName\":\"000001-a.sst\",\"sizeBytes\":10}],\"numKeys\":3}"
        );
    }

    #[test]
    fn log_files_and_checksums_round_trip() {
        let mut log = sst("OPTIONS.log", "OPTIONS-b.log", 7);
        log.kind = FileKind::Log;
        log.checksum = Some(0xdead_beef);
        let manifest = CheckpointManifest {
            files: vec![sst("000002.sst", "000002-a.sst", 20), log],
            num_keys: 9,
        };

        let bytes = manifest.encode().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("\"logFiles\":[{\"localFileName\":\"OPTIONS.log\""));
        assert!(text.contains("\"dfsLogFileName\":\"OPTIONS-b.log\""));
        assert!(text.contains("\"checksum\":3735928559"));

        let decoded = CheckpointManifest::decode(&bytes).unwrap();
        assert_eq!(decoded, manifest);
        assert_eq!(decoded.sst_files().count(), 1);
        assert_eq!(decoded.log_files().count(), 1);
        assert_eq!(decoded.total_bytes(), 27);
    }

    #[test]
    fn decodes_manifest_without_log_files() {
        let text = "v1\n{\"sstFiles\":[],\"numKeys\":0}";
        let decoded = CheckpointManifest::decode(text.as_bytes()).unwrap();
        assert!(decoded.files.is_empty());
        assert_eq!(decoded.num_keys, 0);

        let with_empty = "v1\n{\"sstFiles\":[],\"logFiles\":[],\"numKeys\":4}";
        assert_eq!(
            CheckpointManifest::decode(with_empty.as_bytes())
                .unwrap()
                .num_keys,
            4
        );
    }

    /// # Scenario
    /// A manifest written by a newer format is read.
    ///
    /// # Expected behavior
    /// Decoding fails naming the expected and found format lines.
    #[test]
    fn rejects_unknown_format_line() {
        let err = CheckpointManifest::decode(b"v2\n{}").unwrap_err();
        match err {
            FileManagerError::UnsupportedCheckpointVersion { expected, actual } => {
                assert_eq!(expected, MANIFEST_FORMAT);
                assert_eq!(actual, "v2");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(matches!(
            CheckpointManifest::decode(b""),
            Err(FileManagerError::UnsupportedCheckpointVersion { .. })
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            CheckpointManifest::decode(b"v1\n{\"sstFiles\":"),
            Err(FileManagerError::Json(_))
        ));
    }
}
