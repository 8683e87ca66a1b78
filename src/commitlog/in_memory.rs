use crate::commitlog::{Entry, Index, Log};
use std::convert::TryFrom;
use std::io;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard};

// I am focusing on the consensus algorithm, not strictly about exactly how to persist the data
// durably. I will theoretically model it here.
//
// Clones share the same underlying entries, which is how a log "survives" a replicator being
// dropped and re-created on the same node.
pub struct InMemoryLog<E: Entry> {
    // We don't *need* to convert these to bytes. We could just hold the original entry in memory,
    // but we want to exercise the conversion logic.
    log: Arc<Mutex<Vec<Vec<u8>>>>,
    _pd: PhantomData<E>,
}

impl<E: Entry> InMemoryLog<E> {
    pub fn create() -> Result<Self, io::Error> {
        Ok(InMemoryLog {
            log: Arc::new(Mutex::new(vec![])),
            _pd: PhantomData::default(),
        })
    }

    fn vec_index(index: Index) -> usize {
        // Log API states that Index starts from 1.
        (index.as_u64() - 1) as usize
    }

    fn entries(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.log.lock().expect("InMemoryLog mutex guard poison")
    }
}

impl<E: Entry> Clone for InMemoryLog<E> {
    fn clone(&self) -> Self {
        InMemoryLog {
            log: self.log.clone(),
            _pd: PhantomData::default(),
        }
    }
}

impl<E: Entry> Log<E> for InMemoryLog<E> {
    fn append(&mut self, entry: E) -> Result<Index, io::Error> {
        let mut entries = self.entries();
        entries.push(entry.into());

        Ok(Index::new_usize(entries.len()))
    }

    fn read(&self, index: Index) -> Result<Option<E>, io::Error> {
        let vec_index = Self::vec_index(index);
        let opt_bytes = self.entries().get(vec_index).cloned();

        opt_bytes.map(E::try_from).transpose()
    }

    fn truncate(&mut self, index: Index) {
        let vec_index = Self::vec_index(index);
        self.entries().truncate(vec_index)
    }

    fn next_index(&self) -> Index {
        Index::new_usize(self.entries().len() + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct TestEntry(Vec<u8>);

    impl Entry for TestEntry {}

    impl From<TestEntry> for Vec<u8> {
        fn from(entry: TestEntry) -> Self {
            entry.0
        }
    }

    impl TryFrom<Vec<u8>> for TestEntry {
        type Error = io::Error;

        fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
            if bytes.is_empty() {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "empty entry"));
            }
            Ok(TestEntry(bytes))
        }
    }

    #[test]
    fn append_read_truncate() {
        let mut log = InMemoryLog::<TestEntry>::create().unwrap();
        assert_eq!(log.next_index(), Index::start_index());
        assert_eq!(log.last_index(), None);

        assert_eq!(log.append(TestEntry(vec![1])).unwrap(), Index::new(1));
        let indexes = log.append_all(vec![TestEntry(vec![2]), TestEntry(vec![3])]).unwrap();
        assert_eq!(indexes, vec![Index::new(2), Index::new(3)]);

        assert_eq!(log.read(Index::new(2)).unwrap(), Some(TestEntry(vec![2])));
        assert_eq!(log.read(Index::new(4)).unwrap(), None);
        assert_eq!(log.last_index(), Some(Index::new(3)));

        log.truncate(Index::new(2));
        assert_eq!(log.next_index(), Index::new(2));
        assert_eq!(log.read(Index::new(2)).unwrap(), None);
    }

    #[test]
    fn clones_share_entries() {
        let mut log = InMemoryLog::<TestEntry>::create().unwrap();
        let reopened = log.clone();
        log.append(TestEntry(vec![9])).unwrap();

        assert_eq!(reopened.read(Index::new(1)).unwrap(), Some(TestEntry(vec![9])));
    }

    #[test]
    fn decode_failure_is_io_error() {
        let mut log = InMemoryLog::<TestEntry>::create().unwrap();
        log.append(TestEntry(vec![])).unwrap();

        let err = log.read(Index::new(1)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
