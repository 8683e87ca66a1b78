mod codec;
mod in_memory;
mod message;
mod transport;

pub use in_memory::InMemoryNetwork;
pub use message::AppendEntries;
pub use message::AppendEntriesReply;
pub use message::RequestVote;
pub use message::RequestVoteReply;
pub use message::RpcEnvelope;
pub use message::RpcMessage;
pub use transport::Transport;

#[cfg(test)]
pub(crate) use in_memory::RecordingTransport;
