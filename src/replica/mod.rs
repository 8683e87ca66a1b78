mod election;
mod local_state;
mod peers;
mod quorum;
mod replica;
mod replica_api;
mod replication;
mod voting;
mod write_ahead_log;

#[cfg(test)]
mod test_utils;

pub use local_state::InMemoryLocalStateFactory;
pub use local_state::LocalStateFactory;
pub use local_state::PersistentLocalState;
pub use local_state::Term;
pub use local_state::VolatileLocalState;
pub use peers::NodeId;
pub use peers::ReplicatorInstanceId;
pub use quorum::QuorumConfiguration;
pub use replica_api::ReceiptError;
pub use replica_api::ReplicatorReceipt;
pub use write_ahead_log::EntryPayload;
pub use write_ahead_log::IndexCommitNotice;
pub use write_ahead_log::WriteAheadLogEntry;

pub(crate) use replica::Replica;
pub(crate) use replica::ReplicaConfig;
pub(crate) use replica_api::LeaderTimerTick;
pub(crate) use write_ahead_log::invalid_data;
