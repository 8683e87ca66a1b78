use crate::commitlog;
use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::quorum::QuorumConfiguration;
use crate::replica::write_ahead_log::log_entry::invalid_data;
use crate::replica::write_ahead_log::WriteAheadLogEntry;
use std::io;

/// WriteAheadLog is the replicator-specific log facade.
///
/// Note: A log entry has 3 states (not modeled directly in code):
/// 1. Persisted - written to disk, not yet replicated to majority
/// 2. Committed - written to disk, replicated to majority
/// 3. Applied - a committed entry that has also been announced via commit notices
///
/// A log entry's state has no global truth. Each replica will have their own local view of what
/// state the log entry is in.
pub(crate) struct WriteAheadLog<L>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    // This is the log that we're replicating.
    log: L,
    // Metadata about the highest log entry that we've locally written. It must be updated atomically.
    latest_entry_metadata: Option<(Term, Index)>,

    // Index of highest log entry known to be committed. None if nothing is committed.
    commit_index: Option<Index>,
    // Index of highest log entry applied. None if nothing is applied.
    last_applied_index: Option<Index>,
}

impl<L> WriteAheadLog<L>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    /// Opens a log that may already hold entries. Commit index is not persisted, so it starts
    /// unknown and is re-learned from the leader.
    pub(crate) fn open(log: L) -> Result<Self, io::Error> {
        let latest_entry_metadata = match log.last_index() {
            None => None,
            Some(last_index) => match log.read(last_index)? {
                Some(entry) => Some((entry.term, last_index)),
                None => {
                    return Err(invalid_data(format!(
                        "Log reports last index {:?} but has no entry there",
                        last_index
                    )))
                }
            },
        };

        Ok(WriteAheadLog {
            log,
            latest_entry_metadata,
            commit_index: None,
            last_applied_index: None,
        })
    }

    pub(crate) fn latest_entry(&self) -> Option<(Term, Index)> {
        self.latest_entry_metadata
    }

    pub(crate) fn latest_index(&self) -> Option<Index> {
        self.latest_entry_metadata.map(|(_, index)| index)
    }

    pub(crate) fn next_index(&self) -> Index {
        self.latest_index()
            .map(|index| index.plus(1))
            .unwrap_or_else(Index::start_index)
    }

    pub(crate) fn read(&self, index: Index) -> Result<Option<WriteAheadLogEntry>, io::Error> {
        self.log.read(index)
    }

    fn read_required(&self, index: Index) -> Result<WriteAheadLogEntry, io::Error> {
        match self.read(index)? {
            Some(entry) => Ok(entry),
            None => Err(invalid_data(format!("No log entry for index {:?}", index))),
        }
    }

    pub(crate) fn term_at(&self, index: Index) -> Result<Option<Term>, io::Error> {
        Ok(self.read(index)?.map(|entry| entry.term))
    }

    /// Up to `max_entries` entries starting at `start`.
    pub(crate) fn read_from(&self, start: Index, max_entries: usize) -> Result<Vec<WriteAheadLogEntry>, io::Error> {
        let mut entries = Vec::new();
        let mut index = start;
        while entries.len() < max_entries {
            match self.read(index)? {
                Some(entry) => entries.push(entry),
                None => break,
            }
            index = index.plus(1);
        }

        Ok(entries)
    }

    /// Every configuration entry in the log, in index order.
    pub(crate) fn configurations(&self) -> Result<Vec<(Index, QuorumConfiguration)>, io::Error> {
        let mut configurations = Vec::new();
        if let Some(latest_index) = self.latest_index() {
            let mut index = Index::start_index();
            while index <= latest_index {
                let entry = self.read_required(index)?;
                if let Some(configuration) = entry.as_configuration() {
                    configurations.push((index, configuration.clone()));
                }
                index = index.plus(1);
            }
        }

        Ok(configurations)
    }

    /// Remove anything starting at `index` and later.
    pub(crate) fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        if let Some(commit_index) = self.commit_index {
            assert!(
                index > commit_index,
                "Can't truncate committed entries. Truncate at {:?}, commit index {:?}",
                index,
                commit_index
            );
        }

        let mut new_latest_entry_metadata = None;
        if let Some(new_latest_entry_index) = index.checked_minus(1) {
            new_latest_entry_metadata = self
                .read(new_latest_entry_index)?
                .map(|latest_entry| (latest_entry.term, new_latest_entry_index));
        }

        // Only update log after we've successfully read what new state will be.
        self.log.truncate(index);

        self.latest_entry_metadata = new_latest_entry_metadata;
        Ok(())
    }

    pub(crate) fn append(&mut self, entry: WriteAheadLogEntry) -> Result<Index, io::Error> {
        let appended_term = entry.term;
        let appended_index = self.log.append(entry)?;
        // Only update state after log action completes.
        self.latest_entry_metadata = Some((appended_term, appended_index));

        Ok(appended_index)
    }

    pub(crate) fn append_all(&mut self, entries: Vec<WriteAheadLogEntry>) -> Result<Vec<Index>, io::Error> {
        let last_term = match entries.last() {
            None => return Ok(Vec::new()),
            Some(entry) => entry.term,
        };
        let indexes = self.log.append_all(entries)?;
        if let Some(last_index) = indexes.last() {
            self.latest_entry_metadata = Some((last_term, *last_index));
        }

        Ok(indexes)
    }

    pub(crate) fn commit_index(&self) -> Option<Index> {
        self.commit_index
    }

    /// Leader path. Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index_if_valid(
        &mut self,
        tentative_new_commit_index: Index,
        current_term: Term,
    ) -> Result<bool, io::Error> {
        if matches!(self.commit_index, Some(ci) if tentative_new_commit_index <= ci) {
            return Ok(false);
        }

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        let entry = self.read_required(tentative_new_commit_index)?;
        if entry.term != current_term {
            return Ok(false);
        }

        self.ratchet_fwd_commit_index_panicking(tentative_new_commit_index);

        Ok(true)
    }

    /// Follower path. The leader vouches for the commit index, we just never move it backwards.
    pub(crate) fn ratchet_fwd_commit_index_if_changed(&mut self, new_commit_index: Index) -> bool {
        if matches!(self.commit_index(), Some(ci) if new_commit_index <= ci) {
            return false;
        }

        self.ratchet_fwd_commit_index_panicking(new_commit_index);
        true
    }

    fn ratchet_fwd_commit_index_panicking(&mut self, new_commit_index: Index) {
        // Assert we only mark as committed if we have the entry locally.
        let latest_locally_written_index = self
            .latest_index()
            .expect("Can't ratchet commit index forward if we don't have any local logs");
        assert!(
            latest_locally_written_index >= new_commit_index,
            "Can't ratchet commit index forwards past our local log. Expected [latest log] {:?} >= {:?} [input]",
            latest_locally_written_index,
            new_commit_index,
        );

        self.commit_index.replace(new_commit_index);
    }

    /// Reads all committed but unapplied entries in order, marking them applied.
    pub(crate) fn apply_all_committed_entries(&mut self) -> Result<Vec<(Index, WriteAheadLogEntry)>, io::Error> {
        let mut applied = Vec::new();
        let commit_index = match self.commit_index {
            None => return Ok(applied),
            Some(ci) => ci,
        };

        let mut next_index = self
            .last_applied_index
            .map(|index| index.plus(1))
            .unwrap_or_else(Index::start_index);

        // This may be a long running loop, and starve the event loop from handling another event.
        // It's only long when a replicator learns of a large commit range at once, right after it
        // was created with history.
        while next_index <= commit_index {
            let entry = self.read_required(next_index)?;
            applied.push((next_index, entry));
            self.last_applied_index.replace(next_index);
            next_index = next_index.plus(1);
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::{InMemoryLog, Log};
    use crate::replica::peers::NodeId;
    use bytes::Bytes;

    fn data(term: u64) -> WriteAheadLogEntry {
        WriteAheadLogEntry::data(Term::new(term), vec![Bytes::from_static(b"d")])
    }

    fn new_wal() -> WriteAheadLog<InMemoryLog<WriteAheadLogEntry>> {
        WriteAheadLog::open(InMemoryLog::create().unwrap()).unwrap()
    }

    #[test]
    fn open_recovers_latest_entry() {
        let mut log = InMemoryLog::create().unwrap();
        log.append(data(1)).unwrap();
        log.append(data(2)).unwrap();

        let wal = WriteAheadLog::open(log).unwrap();
        assert_eq!(wal.latest_entry(), Some((Term::new(2), Index::new(2))));
        assert_eq!(wal.next_index(), Index::new(3));
        assert_eq!(wal.commit_index(), None);
    }

    #[test]
    fn truncate_rewinds_latest_entry() {
        let mut wal = new_wal();
        wal.append_all(vec![data(1), data(1), data(2)]).unwrap();
        assert_eq!(wal.latest_entry(), Some((Term::new(2), Index::new(3))));

        wal.truncate(Index::new(2)).unwrap();
        assert_eq!(wal.latest_entry(), Some((Term::new(1), Index::new(1))));

        wal.truncate(Index::start_index()).unwrap();
        assert_eq!(wal.latest_entry(), None);
    }

    #[test]
    fn leader_commits_only_current_term_entries() {
        let mut wal = new_wal();
        wal.append_all(vec![data(1), data(1), data(2)]).unwrap();

        // Entry 2 is from term 1, we're on term 2.
        assert!(!wal.ratchet_fwd_commit_index_if_valid(Index::new(2), Term::new(2)).unwrap());
        assert_eq!(wal.commit_index(), None);

        assert!(wal.ratchet_fwd_commit_index_if_valid(Index::new(3), Term::new(2)).unwrap());
        assert_eq!(wal.commit_index(), Some(Index::new(3)));

        // Never backwards.
        assert!(!wal.ratchet_fwd_commit_index_if_valid(Index::new(2), Term::new(2)).unwrap());
        assert!(!wal.ratchet_fwd_commit_index_if_changed(Index::new(1)));
        assert_eq!(wal.commit_index(), Some(Index::new(3)));
    }

    #[test]
    fn apply_returns_each_entry_once() {
        let mut wal = new_wal();
        wal.append_all(vec![data(1), data(1), data(1)]).unwrap();
        assert!(wal.apply_all_committed_entries().unwrap().is_empty());

        wal.ratchet_fwd_commit_index_if_changed(Index::new(2));
        let applied: Vec<_> = wal
            .apply_all_committed_entries()
            .unwrap()
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        assert_eq!(applied, vec![Index::new(1), Index::new(2)]);

        wal.ratchet_fwd_commit_index_if_changed(Index::new(3));
        let applied = wal.apply_all_committed_entries().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].0, Index::new(3));
    }

    #[test]
    fn read_from_and_configurations() {
        let mut wal = new_wal();
        let configuration = QuorumConfiguration::new(vec![NodeId(1), NodeId(2)]);
        wal.append(data(1)).unwrap();
        wal.append(WriteAheadLogEntry::configuration(Term::new(1), configuration.clone()))
            .unwrap();
        wal.append(data(1)).unwrap();

        assert_eq!(wal.read_from(Index::new(2), 10).unwrap().len(), 2);
        assert_eq!(wal.read_from(Index::new(1), 2).unwrap().len(), 2);
        assert!(wal.read_from(Index::new(4), 10).unwrap().is_empty());
        assert_eq!(wal.configurations().unwrap(), vec![(Index::new(2), configuration)]);
    }
}
