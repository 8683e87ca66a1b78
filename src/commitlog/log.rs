use std::convert::TryFrom;
use std::{fmt, io};

#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
struct U64NonZero(u64);

impl U64NonZero {
    fn new(val: u64) -> Self {
        assert_ne!(val, 0);
        U64NonZero(val)
    }
}

/// Index is an index of an entry in the log; i.e. a log entry's index.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Index(U64NonZero);

impl Index {
    pub fn new(index: u64) -> Self {
        Index(U64NonZero::new(index))
    }

    pub fn new_usize(index: usize) -> Self {
        Self::new(index as u64)
    }

    /// Interprets `0` as "no index", which is how indexes travel on the wire.
    pub fn from_u64_opt(index: u64) -> Option<Self> {
        if index == 0 {
            None
        } else {
            Some(Self::new(index))
        }
    }

    pub fn start_index() -> Self {
        Self::new(1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0 .0
    }

    pub fn plus(&self, delta: u64) -> Index {
        Index::new(self.as_u64() + delta)
    }

    pub fn checked_minus(&self, delta: u64) -> Option<Index> {
        self.as_u64().checked_sub(delta).and_then(Self::from_u64_opt)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 .0)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0 .0)
    }
}

/// Log is an append only log intended for use as a replicated commit log in a database.
///
/// Log indexes entries starting from 1. There will be no entry existing at index 0. The first
/// entry is written at index 1. Implementations must have made an entry durable by the time
/// `append()` returns.
pub trait Log<E: Entry> {
    /// append() appends a log entry to the log at the next log entry index, then returns
    /// the log entry index that was just used to append the entry.
    fn append(&mut self, entry: E) -> Result<Index, io::Error>;

    /// Appends entries in order and returns the index assigned to each one.
    fn append_all(&mut self, entries: Vec<E>) -> Result<Vec<Index>, io::Error> {
        let mut indexes = Vec::with_capacity(entries.len());
        for entry in entries {
            indexes.push(self.append(entry)?);
        }

        Ok(indexes)
    }

    /// Read log entry at specified index.
    fn read(&self, index: Index) -> Result<Option<E>, io::Error>;

    /// Soft-deletes anything starting at `index` and later. Soft-deletion makes this infallible.
    /// If hard-deletion is required, add a new method.
    fn truncate(&mut self, index: Index);

    /// next_index returns the next index that will be used to append an entry.
    fn next_index(&self) -> Index;

    /// Index of the last entry, or None if the log is empty.
    fn last_index(&self) -> Option<Index> {
        self.next_index().checked_minus(1)
    }
}

/// Entries are stored as bytes. Decoding is fallible because the bytes come from storage.
pub trait Entry: Clone + Into<Vec<u8>> + TryFrom<Vec<u8>, Error = io::Error> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_arithmetic() {
        let index = Index::new(3);
        assert_eq!(index.plus(2), Index::new(5));
        assert_eq!(index.checked_minus(2), Some(Index::new(1)));
        assert_eq!(index.checked_minus(3), None);
        assert_eq!(index.checked_minus(10), None);
        assert_eq!(Index::from_u64_opt(0), None);
        assert_eq!(Index::from_u64_opt(7), Some(Index::new(7)));
    }

    #[test]
    #[should_panic]
    fn index_zero_is_illegal() {
        Index::new(0);
    }
}
