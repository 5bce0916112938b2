#[cfg(test)]
mod tests {
    use crate::changelog::DEFAULT_COLUMN_FAMILY as CF;
    use crate::engine::tests::helpers::*;
    use std::collections::BTreeMap;
    use std::ops::Bound;
    use tempfile::TempDir;

    /// # Scenario
    /// Keys are overwritten and deleted across many flushes.
    ///
    /// # Starting environment
    /// Small write buffer so the history spans data files and memtables.
    ///
    /// # Expected behavior
    /// A full scan equals a `BTreeMap` model of the same operations.
    #[test]
    fn scan_matches_model_across_layers() {
        let dir = TempDir::new().unwrap();
        let engine = small_buffer(dir.path());
        let mut model = BTreeMap::new();

        for round in 0..3u32 {
            for i in 0..60 {
                let k = key(i);
                if (i + round) % 5 == 0 {
                    engine.delete(CF, &k).unwrap();
                    model.remove(&k);
                } else {
                    let v = format!("r{round}-{i}").into_bytes();
                    engine.put(CF, &k, &v).unwrap();
                    model.insert(k, v);
                }
            }
        }

        let scanned = collect(engine.iter(CF).unwrap());
        let expected: Vec<_> = model.into_iter().collect();
        assert_eq!(scanned, expected);
    }

    #[test]
    fn bounded_range() {
        let dir = TempDir::new().unwrap();
        let engine = small_buffer(dir.path());
        for i in 0..50 {
            engine.put(CF, &key(i), &value(i)).unwrap();
        }

        let got = collect(
            engine
                .range(
                    CF,
                    Bound::Included(key(10).as_slice()),
                    Bound::Excluded(key(13).as_slice()),
                )
                .unwrap(),
        );
        assert_eq!(
            got,
            vec![(key(10), value(10)), (key(11), value(11)), (key(12), value(12))]
        );
    }

    #[test]
    fn prefix_scan_stops_at_prefix_end() {
        let dir = TempDir::new().unwrap();
        let engine = memtable_only(dir.path());
        for k in ["app", "apple", "apply", "apq", "ap", "b"] {
            engine.put(CF, k.as_bytes(), b"v").unwrap();
        }
        engine.put(CF, &[b'z', 0xFF], b"v").unwrap();
        engine.put(CF, &[b'z', 0xFF, 0x01], b"v").unwrap();
        engine.flush().unwrap();
        engine.delete(CF, b"apply").unwrap();

        let keys: Vec<_> = collect(engine.prefix_scan(CF, b"app").unwrap())
            .into_iter()
            .map(|(k, _)| String::from_utf8(k).unwrap())
            .collect();
        assert_eq!(keys, ["app", "apple"]);

        let high = collect(engine.prefix_scan(CF, &[b'z', 0xFF]).unwrap());
        assert_eq!(high.len(), 2);
    }

    #[test]
    fn scan_of_unknown_family_is_empty() {
        let dir = TempDir::new().unwrap();
        let engine = memtable_only(dir.path());
        engine.put(CF, b"a", b"1").unwrap();
        assert!(collect(engine.iter("nope").unwrap()).is_empty());
    }

    /// # Scenario
    /// A scan is started, then the engine keeps writing and flushing.
    ///
    /// # Expected behavior
    /// The scan sees the state at the moment it was opened.
    #[test]
    fn scan_is_isolated_from_later_writes() {
        let dir = TempDir::new().unwrap();
        let engine = memtable_only(dir.path());
        engine.put(CF, b"a", b"1").unwrap();
        engine.put(CF, b"b", b"2").unwrap();

        let iter = engine.iter(CF).unwrap();
        engine.put(CF, b"c", b"3").unwrap();
        engine.delete(CF, b"a").unwrap();
        engine.flush().unwrap();

        assert_eq!(
            collect(iter),
            vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"2".to_vec())]
        );
    }
}
