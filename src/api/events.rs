use crate::api::Broadcaster;
use crate::replica::{NodeId, QuorumConfiguration, ReplicatorInstanceId, Term};
use chrono::{DateTime, Utc};

/// Role of a replicator in its quorum.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReplicatorState {
    Follower,
    Candidate,
    Leader,
}

/// Something that happened, as observed by one replicator.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicatorInstanceEvent {
    pub instance: ReplicatorInstanceId,
    pub event_time: DateTime<Utc>,
    pub kind: ReplicatorEventKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReplicatorEventKind {
    QuorumStart,
    /// Either we won the election, or we heard from the winner for the first time.
    LeaderElected {
        new_leader: NodeId,
        term: Term,
    },
    /// We timed out waiting for a leader in `term`, and started an election.
    ElectionTimeout {
        term: Term,
    },
    LeadershipLost {
        term: Term,
    },
    /// A non-transitional configuration committed.
    QuorumConfigurationCommitted {
        configuration: QuorumConfiguration,
    },
    /// We lost leadership before this transitional configuration committed.
    QuorumConfigurationChangeFailed {
        configuration: QuorumConfiguration,
    },
    /// Local storage failed. The replicator keeps running, but may not make progress.
    QuorumFailure {
        reason: String,
    },
}

/// Stamps events with who emitted them and when.
#[derive(Clone)]
pub(crate) struct InstanceEventPublisher {
    instance: ReplicatorInstanceId,
    broadcaster: Broadcaster<ReplicatorInstanceEvent>,
}

impl InstanceEventPublisher {
    pub(crate) fn new(instance: ReplicatorInstanceId, broadcaster: Broadcaster<ReplicatorInstanceEvent>) -> Self {
        InstanceEventPublisher { instance, broadcaster }
    }

    pub(crate) fn publish(&self, kind: ReplicatorEventKind) {
        self.broadcaster.publish(ReplicatorInstanceEvent {
            instance: self.instance.clone(),
            event_time: Utc::now(),
            kind,
        });
    }

    pub(crate) fn close(&self) {
        self.broadcaster.close();
    }
}
