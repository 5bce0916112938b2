//! Write buffer sizing and the `FlushRequired` signal.

#[cfg(test)]
mod tests {
    use crate::memtable::{Memtable, MemtableError};

    #[test]
    fn first_entry_is_always_accepted() {
        let mut memtable = Memtable::new(8);
        memtable.put(b"key".to_vec(), vec![0; 1024]).unwrap();
        assert!(memtable.approximate_size() > 1024);
    }

    /// # Scenario
    /// Writes continue until the buffer is full.
    ///
    /// # Expected behavior
    /// The write that would exceed the limit fails with `FlushRequired` and
    /// leaves the memtable unchanged.
    #[test]
    fn full_buffer_requires_flush() {
        let mut memtable = Memtable::new(256);
        let mut written = 0;
        loop {
            match memtable.put(format!("key-{written:04}").into_bytes(), vec![1; 16]) {
                Ok(_) => written += 1,
                Err(e) => {
                    assert_eq!(e, MemtableError::FlushRequired);
                    break;
                }
            }
        }
        assert!(written > 1);
        assert_eq!(memtable.len(), written);
        assert!(memtable.approximate_size() <= 256);
    }

    #[test]
    fn size_delta_accounts_for_replacement() {
        let mut memtable = Memtable::new(4096);
        let first = memtable.put(b"k".to_vec(), vec![0; 100]).unwrap();
        let second = memtable.put(b"k".to_vec(), vec![0; 40]).unwrap();
        let third = memtable.delete(b"k".to_vec()).unwrap();

        assert!(first > 0);
        assert_eq!(second, -60);
        assert_eq!(third, -40);
        assert_eq!(
            memtable.approximate_size() as isize,
            first + second + third
        );
    }
}
