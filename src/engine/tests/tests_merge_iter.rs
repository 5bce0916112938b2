#[cfg(test)]
mod tests {
    use crate::engine::iter::{LayerIter, LiveEntries, MergeIterator};
    use crate::engine::{EngineError, MergeOperator, StringAppendOperator};

    fn layer(entries: &[(&str, Option<&str>)]) -> LayerIter {
        let owned: Vec<_> = entries
            .iter()
            .map(|(k, v)| Ok((k.as_bytes().to_vec(), v.map(|v| v.as_bytes().to_vec()))))
            .collect();
        Box::new(owned.into_iter())
    }

    /// # Scenario
    /// Three layers overlap on several keys.
    ///
    /// # Expected behavior
    /// The merged stream is key-ordered with the newest layer first for
    /// equal keys; the live view keeps only the newest entry and hides
    /// tombstones.
    #[test]
    fn newest_layer_wins() {
        let layers = vec![
            layer(&[("b", None), ("d", Some("d0"))]),
            layer(&[("a", Some("a1")), ("b", Some("b1"))]),
            layer(&[("a", Some("a2")), ("c", Some("c2")), ("d", Some("d2"))]),
        ];
        let merged: Vec<_> = MergeIterator::new(layers)
            .map(|r| r.unwrap())
            .map(|(k, _, layer)| (String::from_utf8(k).unwrap(), layer))
            .collect();
        assert_eq!(
            merged,
            [
                ("a".to_string(), 1),
                ("a".to_string(), 2),
                ("b".to_string(), 0),
                ("b".to_string(), 1),
                ("c".to_string(), 2),
                ("d".to_string(), 0),
                ("d".to_string(), 2),
            ]
        );

        let layers = vec![
            layer(&[("b", None), ("d", Some("d0"))]),
            layer(&[("a", Some("a1")), ("b", Some("b1"))]),
            layer(&[("a", Some("a2")), ("c", Some("c2")), ("d", Some("d2"))]),
        ];
        let live: Vec<_> = LiveEntries::new(MergeIterator::new(layers))
            .map(|r| r.unwrap())
            .map(|(k, v)| (String::from_utf8(k).unwrap(), String::from_utf8(v).unwrap()))
            .collect();
        assert_eq!(
            live,
            [
                ("a".to_string(), "a1".to_string()),
                ("c".to_string(), "c2".to_string()),
                ("d".to_string(), "d0".to_string()),
            ]
        );
    }

    #[test]
    fn first_error_ends_the_stream() {
        let failing: LayerIter = Box::new(
            vec![
                Ok((b"a".to_vec(), Some(b"1".to_vec()))),
                Err(EngineError::Internal("boom".into())),
                Ok((b"z".to_vec(), Some(b"2".to_vec()))),
            ]
            .into_iter(),
        );
        let mut live = LiveEntries::new(MergeIterator::new(vec![failing]));

        assert!(live.next().unwrap().is_err());
        assert!(live.next().is_none());
    }

    #[test]
    fn no_layers_yields_nothing() {
        assert!(MergeIterator::new(Vec::new()).next().is_none());
    }

    #[test]
    fn string_append_operator() {
        let op = StringAppendOperator;
        assert_eq!(op.merge(None, b"1"), b"1");
        assert_eq!(op.merge(Some(b"1".as_slice()), b"2"), b"1,2");
        assert_eq!(op.merge(Some(b"".as_slice()), b""), b",");
    }
}
