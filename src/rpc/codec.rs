use crate::commitlog::Index;
use crate::replica::{invalid_data, NodeId, Term, WriteAheadLogEntry};
use crate::rpc::{AppendEntries, AppendEntriesReply, RequestVote, RequestVoteReply, RpcEnvelope, RpcMessage};
use prost::Message;
use std::convert::TryFrom;
use std::io;

// Index and term 0 stand for "none" on the wire.

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoRpcEnvelope {
    #[prost(string, tag = "1")]
    quorum_id: String,
    #[prost(uint64, tag = "2")]
    to: u64,
    #[prost(uint64, tag = "3")]
    from: u64,
    #[prost(uint64, tag = "4")]
    message_id: u64,
    #[prost(oneof = "ProtoRpcMessage", tags = "5, 6, 7, 8")]
    message: Option<ProtoRpcMessage>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
enum ProtoRpcMessage {
    #[prost(message, tag = "5")]
    AppendEntries(ProtoAppendEntries),
    #[prost(message, tag = "6")]
    AppendEntriesReply(ProtoAppendEntriesReply),
    #[prost(message, tag = "7")]
    RequestVote(ProtoRequestVote),
    #[prost(message, tag = "8")]
    RequestVoteReply(ProtoRequestVoteReply),
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoAppendEntries {
    #[prost(uint64, tag = "1")]
    term: u64,
    #[prost(uint64, tag = "2")]
    leader_id: u64,
    #[prost(uint64, tag = "3")]
    previous_log_entry_term: u64,
    #[prost(uint64, tag = "4")]
    previous_log_entry_index: u64,
    #[prost(uint64, tag = "5")]
    leader_commit_index: u64,
    // Each one is a serialized log entry.
    #[prost(bytes, repeated, tag = "6")]
    entries: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoAppendEntriesReply {
    #[prost(uint64, tag = "1")]
    term: u64,
    #[prost(bool, tag = "2")]
    success: bool,
    #[prost(uint64, tag = "3")]
    next_log_index: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoRequestVote {
    #[prost(uint64, tag = "1")]
    term: u64,
    #[prost(uint64, tag = "2")]
    candidate_id: u64,
    #[prost(uint64, tag = "3")]
    last_log_entry_term: u64,
    #[prost(uint64, tag = "4")]
    last_log_entry_index: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoRequestVoteReply {
    #[prost(uint64, tag = "1")]
    term: u64,
    #[prost(bool, tag = "2")]
    vote_granted: bool,
}

impl RpcEnvelope {
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let proto = ProtoRpcEnvelope {
            quorum_id: self.quorum_id.clone(),
            to: self.to.as_u64(),
            from: self.from.as_u64(),
            message_id: self.message_id,
            message: Some(ProtoRpcMessage::from(&self.message)),
        };

        let mut bytes = Vec::with_capacity(proto.encoded_len());
        // Encoding into a Vec can't run out of capacity.
        let _ = proto.encode(&mut bytes);

        bytes
    }

    pub fn decode_from_slice(bytes: &[u8]) -> Result<RpcEnvelope, io::Error> {
        let proto = ProtoRpcEnvelope::decode(bytes).map_err(|e| invalid_data(e.to_string()))?;
        let message = match proto.message {
            Some(message) => RpcMessage::try_from(message)?,
            None => return Err(invalid_data("Envelope has no message".to_string())),
        };

        Ok(RpcEnvelope {
            quorum_id: proto.quorum_id,
            to: NodeId(proto.to),
            from: NodeId(proto.from),
            message_id: proto.message_id,
            message,
        })
    }
}

impl From<&RpcMessage> for ProtoRpcMessage {
    fn from(message: &RpcMessage) -> Self {
        match message {
            RpcMessage::AppendEntries(ae) => {
                let (previous_log_entry_term, previous_log_entry_index) = split_log_entry(ae.previous_log_entry);
                ProtoRpcMessage::AppendEntries(ProtoAppendEntries {
                    term: ae.term.as_u64(),
                    leader_id: ae.leader_id.as_u64(),
                    previous_log_entry_term,
                    previous_log_entry_index,
                    leader_commit_index: index_to_u64(ae.leader_commit_index),
                    entries: ae.entries.iter().cloned().map(Vec::<u8>::from).collect(),
                })
            }
            RpcMessage::AppendEntriesReply(reply) => ProtoRpcMessage::AppendEntriesReply(ProtoAppendEntriesReply {
                term: reply.term.as_u64(),
                success: reply.success,
                next_log_index: index_to_u64(reply.next_log_index),
            }),
            RpcMessage::RequestVote(rv) => {
                let (last_log_entry_term, last_log_entry_index) = split_log_entry(rv.last_log_entry);
                ProtoRpcMessage::RequestVote(ProtoRequestVote {
                    term: rv.term.as_u64(),
                    candidate_id: rv.candidate_id.as_u64(),
                    last_log_entry_term,
                    last_log_entry_index,
                })
            }
            RpcMessage::RequestVoteReply(reply) => ProtoRpcMessage::RequestVoteReply(ProtoRequestVoteReply {
                term: reply.term.as_u64(),
                vote_granted: reply.vote_granted,
            }),
        }
    }
}

impl TryFrom<ProtoRpcMessage> for RpcMessage {
    type Error = io::Error;

    fn try_from(proto: ProtoRpcMessage) -> Result<Self, Self::Error> {
        let message = match proto {
            ProtoRpcMessage::AppendEntries(ae) => {
                let entries = ae
                    .entries
                    .into_iter()
                    .map(WriteAheadLogEntry::try_from)
                    .collect::<Result<Vec<_>, _>>()?;
                RpcMessage::AppendEntries(AppendEntries {
                    term: Term::new(ae.term),
                    leader_id: NodeId(ae.leader_id),
                    previous_log_entry: join_log_entry(ae.previous_log_entry_term, ae.previous_log_entry_index)?,
                    leader_commit_index: Index::from_u64_opt(ae.leader_commit_index),
                    entries,
                })
            }
            ProtoRpcMessage::AppendEntriesReply(reply) => RpcMessage::AppendEntriesReply(AppendEntriesReply {
                term: Term::new(reply.term),
                success: reply.success,
                next_log_index: Index::from_u64_opt(reply.next_log_index),
            }),
            ProtoRpcMessage::RequestVote(rv) => RpcMessage::RequestVote(RequestVote {
                term: Term::new(rv.term),
                candidate_id: NodeId(rv.candidate_id),
                last_log_entry: join_log_entry(rv.last_log_entry_term, rv.last_log_entry_index)?,
            }),
            ProtoRpcMessage::RequestVoteReply(reply) => RpcMessage::RequestVoteReply(RequestVoteReply {
                term: Term::new(reply.term),
                vote_granted: reply.vote_granted,
            }),
        };

        Ok(message)
    }
}

fn index_to_u64(index: Option<Index>) -> u64 {
    index.map(|index| index.as_u64()).unwrap_or(0)
}

fn split_log_entry(log_entry: Option<(Term, Index)>) -> (u64, u64) {
    match log_entry {
        None => (0, 0),
        Some((term, index)) => (term.as_u64(), index.as_u64()),
    }
}

fn join_log_entry(term: u64, index: u64) -> Result<Option<(Term, Index)>, io::Error> {
    match (term, Index::from_u64_opt(index)) {
        (0, None) => Ok(None),
        (term, Some(index)) if term > 0 => Ok(Some((Term::new(term), index))),
        (term, index) => Err(invalid_data(format!(
            "Log entry position needs both term and index, got term {} index {:?}",
            term, index
        ))),
    }
}
