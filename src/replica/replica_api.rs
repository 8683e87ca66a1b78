use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::peers::NodeId;
use std::io;

/// Position a just-submitted entry was assigned in the log. It doesn't imply the entry is
/// committed; match it against `IndexCommitNotice`s for that.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ReplicatorReceipt {
    pub term: Term,
    pub index: Index,
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("Failed to persist log: {0:?}")]
    LocalIoError(io::Error),
    #[error("Requested peers are the same as the current quorum")]
    UnchangedQuorum,
    #[error("A quorum can't change to zero peers")]
    EmptyQuorum,
    #[error("Another quorum change is still in progress")]
    ChangeInProgress,
    #[error("I'm not leader")]
    NotLeader,
    #[error("Leadership was lost before the quorum change committed")]
    Abandoned,
    #[error("Leadership was lost while finishing the quorum change. The next leader completes it.")]
    LeadershipLost,
    #[error("Replicator shut down")]
    Cancelled,
}

/// LeaderTimerTick contains info for a single tick of a leader's per-peer timer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeaderTimerTick {
    pub(crate) peer_id: NodeId,
    pub(crate) term: Term,
}
