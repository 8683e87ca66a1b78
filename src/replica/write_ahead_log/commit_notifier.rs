use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::peers::{NodeId, ReplicatorInstanceId};

/// Commit progress of one replicator. Consecutive notices describe contiguous ranges, and each
/// range holds entries of a single term.
///
/// The first notice of a replicator instance covers `[1, up_to_and_including]` and carries the
/// term of the last entry in that range only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexCommitNotice {
    pub quorum_id: String,
    pub node_id: NodeId,
    pub up_to_and_including: Index,
    pub term: Term,
}

pub(crate) struct CommitNotifier {
    instance: ReplicatorInstanceId,
    first_notice_sent: bool,
}

impl CommitNotifier {
    pub(crate) fn new(instance: ReplicatorInstanceId) -> Self {
        CommitNotifier {
            instance,
            first_notice_sent: false,
        }
    }

    /// Notices for newly committed entries, given in increasing index order.
    pub(crate) fn notices(&mut self, newly_committed: &[(Index, Term)]) -> Vec<IndexCommitNotice> {
        let last = match newly_committed.last() {
            None => return Vec::new(),
            Some(last) => *last,
        };

        if !self.first_notice_sent {
            self.first_notice_sent = true;
            return vec![self.notice(last)];
        }

        let mut notices = Vec::new();
        for window in newly_committed.windows(2) {
            let (index, term) = window[0];
            let (_, next_term) = window[1];
            if term != next_term {
                notices.push(self.notice((index, term)));
            }
        }
        notices.push(self.notice(last));

        notices
    }

    fn notice(&self, (up_to_and_including, term): (Index, Term)) -> IndexCommitNotice {
        IndexCommitNotice {
            quorum_id: self.instance.quorum_id.clone(),
            node_id: self.instance.node_id,
            up_to_and_including,
            term,
        }
    }
}
