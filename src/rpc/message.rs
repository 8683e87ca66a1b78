use crate::commitlog::Index;
use crate::replica::{NodeId, Term, WriteAheadLogEntry};

/// An addressed consensus message. `message_id` correlates a reply with the request it
/// answers; a reply carries its request's id.
#[derive(Clone, Debug, PartialEq)]
pub struct RpcEnvelope {
    pub quorum_id: String,
    pub to: NodeId,
    pub from: NodeId,
    pub message_id: u64,
    pub message: RpcMessage,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RpcMessage {
    AppendEntries(AppendEntries),
    AppendEntriesReply(AppendEntriesReply),
    RequestVote(RequestVote),
    RequestVoteReply(RequestVoteReply),
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntries {
    pub term: Term,
    pub leader_id: NodeId,
    // "Previous log entry" is the log entry immediately preceding `entries`.
    pub previous_log_entry: Option<(Term, Index)>,
    pub leader_commit_index: Option<Index>,
    pub entries: Vec<WriteAheadLogEntry>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AppendEntriesReply {
    pub term: Term,
    pub success: bool,
    /// Index right after the end of the replier's log. Lets the leader skip back further than one
    /// entry after a mismatch.
    pub next_log_index: Option<Index>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVote {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_entry: Option<(Term, Index)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RequestVoteReply {
    pub term: Term,
    pub vote_granted: bool,
}

impl RpcEnvelope {
    /// The reply envelope to this one.
    pub fn reply(&self, message: RpcMessage) -> RpcEnvelope {
        RpcEnvelope {
            quorum_id: self.quorum_id.clone(),
            to: self.from,
            from: self.to,
            message_id: self.message_id,
            message,
        }
    }
}

impl RpcMessage {
    pub fn name(&self) -> &'static str {
        match self {
            RpcMessage::AppendEntries(_) => "AppendEntries",
            RpcMessage::AppendEntriesReply(_) => "AppendEntriesReply",
            RpcMessage::RequestVote(_) => "RequestVote",
            RpcMessage::RequestVoteReply(_) => "RequestVoteReply",
        }
    }

    pub fn as_append_entries(&self) -> Option<&AppendEntries> {
        match self {
            RpcMessage::AppendEntries(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_append_entries_reply(&self) -> Option<&AppendEntriesReply> {
        match self {
            RpcMessage::AppendEntriesReply(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_request_vote(&self) -> Option<&RequestVote> {
        match self {
            RpcMessage::RequestVote(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_request_vote_reply(&self) -> Option<&RequestVoteReply> {
        match self {
            RpcMessage::RequestVoteReply(message) => Some(message),
            _ => None,
        }
    }

    /// Term of the sender when it sent the message.
    pub fn term(&self) -> Term {
        match self {
            RpcMessage::AppendEntries(message) => message.term,
            RpcMessage::AppendEntriesReply(message) => message.term,
            RpcMessage::RequestVote(message) => message.term,
            RpcMessage::RequestVoteReply(message) => message.term,
        }
    }
}
