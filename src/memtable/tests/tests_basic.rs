#[cfg(test)]
mod tests {
    use crate::memtable::{Memtable, Lookup};
    use std::ops::Bound;

    #[test]
    fn test_put_and_get() {
        let mut memtable = Memtable::new(1024);
        memtable.put(b"key1".to_vec(), b"value1".to_vec()).unwrap();

        assert_eq!(memtable.get(b"key1"), Lookup::Value(b"value1".to_vec()));
        assert_eq!(memtable.get(b"key2"), Lookup::Absent);
    }

    #[test]
    fn test_delete_leaves_tombstone() {
        let mut memtable = Memtable::new(1024);
        memtable.put(b"key1".to_vec(), b"value1".to_vec()).unwrap();
        memtable.delete(b"key1".to_vec()).unwrap();
        memtable.delete(b"never-written".to_vec()).unwrap();

        assert_eq!(memtable.get(b"key1"), Lookup::Deleted);
        assert_eq!(memtable.get(b"never-written"), Lookup::Deleted);
        assert_eq!(memtable.len(), 2);
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let mut memtable = Memtable::new(1024);
        memtable.put(b"k".to_vec(), b"1".to_vec()).unwrap();
        memtable.put(b"k".to_vec(), b"2".to_vec()).unwrap();
        assert_eq!(memtable.get(b"k"), Lookup::Value(b"2".to_vec()));
        assert_eq!(memtable.len(), 1);
    }

    #[test]
    fn test_empty_key_and_value_are_allowed() {
        let mut memtable = Memtable::new(1024);
        memtable.put(Vec::new(), Vec::new()).unwrap();
        assert_eq!(memtable.get(b""), Lookup::Value(Vec::new()));
    }

    /// # Scenario
    /// A bounded range over a memtable containing values and tombstones.
    ///
    /// # Expected behavior
    /// Entries come back in key order with tombstones reported as `None`,
    /// honouring inclusive and exclusive bounds.
    #[test]
    fn test_range_includes_tombstones_in_order() {
        let mut memtable = Memtable::new(4096);
        for key in [b"d", b"a", b"c", b"b"] {
            memtable.put(key.to_vec(), key.to_vec()).unwrap();
        }
        memtable.delete(b"c".to_vec()).unwrap();

        let got: Vec<_> = memtable
            .range(Bound::Included(b"b".as_slice()), Bound::Excluded(b"d".as_slice()))
            .map(|(k, v)| (k.to_vec(), v.map(<[u8]>::to_vec)))
            .collect();
        assert_eq!(
            got,
            vec![(b"b".to_vec(), Some(b"b".to_vec())), (b"c".to_vec(), None)]
        );

        let all: Vec<_> = memtable.into_entries().map(|(k, _)| k).collect();
        assert_eq!(all, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }
}
