//! This mod is meant to hold most of the code for the library's client-facing API.
mod events;
mod module;
mod options;
mod receipt;
mod replicator;
mod subscription;

pub use events::ReplicatorEventKind;
pub use events::ReplicatorInstanceEvent;
pub use events::ReplicatorState;
pub use module::CreateReplicatorError;
pub use module::InMemoryReplicationModule;
pub use module::ModuleCreationError;
pub use module::ReplicationModule;
pub use options::ReplicatorOptions;
pub use receipt::QuorumChange;
pub use receipt::ReceiptFuture;
pub use replicator::Replicator;
pub use replicator::SubmitError;
pub use subscription::Subscription;

// So Replica can publish to subscribers.
pub(crate) use events::InstanceEventPublisher;
pub(crate) use subscription::Broadcaster;
