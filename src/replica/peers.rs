use std::fmt;

/// NodeId identifies a node. A node runs at most one replicator per quorum.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a running replicator. The same pair may be reconstituted after a restart.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct ReplicatorInstanceId {
    pub quorum_id: String,
    pub node_id: NodeId,
}

impl ReplicatorInstanceId {
    pub fn new(quorum_id: impl Into<String>, node_id: NodeId) -> Self {
        ReplicatorInstanceId {
            quorum_id: quorum_id.into(),
            node_id,
        }
    }
}
