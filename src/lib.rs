mod actor;
mod api;
mod commitlog;
mod replica;
mod rpc;

pub use api::CreateReplicatorError;
pub use api::InMemoryReplicationModule;
pub use api::ModuleCreationError;
pub use api::QuorumChange;
pub use api::ReceiptFuture;
pub use api::ReplicationModule;
pub use api::Replicator;
pub use api::ReplicatorEventKind;
pub use api::ReplicatorInstanceEvent;
pub use api::ReplicatorOptions;
pub use api::ReplicatorState;
pub use api::SubmitError;
pub use api::Subscription;
pub use commitlog::Entry;
pub use commitlog::InMemoryLog;
pub use commitlog::InMemoryLogFactory;
pub use commitlog::Index;
pub use commitlog::Log;
pub use commitlog::LogConfig;
pub use commitlog::LogFactory;
pub use replica::EntryPayload;
pub use replica::InMemoryLocalStateFactory;
pub use replica::IndexCommitNotice;
pub use replica::LocalStateFactory;
pub use replica::NodeId;
pub use replica::PersistentLocalState;
pub use replica::QuorumConfiguration;
pub use replica::ReceiptError;
pub use replica::ReplicatorInstanceId;
pub use replica::ReplicatorReceipt;
pub use replica::Term;
pub use replica::VolatileLocalState;
pub use replica::WriteAheadLogEntry;
pub use rpc::AppendEntries;
pub use rpc::AppendEntriesReply;
pub use rpc::InMemoryNetwork;
pub use rpc::RequestVote;
pub use rpc::RequestVoteReply;
pub use rpc::RpcEnvelope;
pub use rpc::RpcMessage;
pub use rpc::Transport;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
