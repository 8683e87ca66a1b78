use crate::commitlog;
use crate::replica::local_state::Term;
use crate::replica::peers::NodeId;
use crate::replica::quorum::QuorumConfiguration;
use bytes::Bytes;
use prost::Message;
use std::convert::TryFrom;
use std::io;

/// Byte representation:
///
/// ```text
/// +---+-----------------------------------------...-+
/// |Vrs|   ProtoLogEntry (protobuf, variable size)   |
/// +---+-----------------------------------------...-+
/// ```
///
/// * `Vrs` - version of the serialized payload
/// * `ProtoLogEntry` - term, plus either the caller's buffers or a quorum configuration
///
/// Not needed:
///
/// * Checksum is not needed, it's guaranteed by underlying commitlog.
/// * Size/length is not needed; the underlying commitlog will give us the correctly allocated array.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteAheadLogEntry {
    pub term: Term,
    pub payload: EntryPayload,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EntryPayload {
    /// Buffers of one `log_data()` call, in order.
    Data(Vec<Bytes>),
    Configuration(QuorumConfiguration),
}

impl WriteAheadLogEntry {
    pub fn data(term: Term, buffers: Vec<Bytes>) -> Self {
        WriteAheadLogEntry {
            term,
            payload: EntryPayload::Data(buffers),
        }
    }

    pub fn configuration(term: Term, configuration: QuorumConfiguration) -> Self {
        WriteAheadLogEntry {
            term,
            payload: EntryPayload::Configuration(configuration),
        }
    }

    pub fn as_configuration(&self) -> Option<&QuorumConfiguration> {
        match &self.payload {
            EntryPayload::Configuration(configuration) => Some(configuration),
            EntryPayload::Data(_) => None,
        }
    }
}

const WAL_ENTRY_FORMAT_VERSION: u8 = 1;

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoLogEntry {
    #[prost(uint64, tag = "1")]
    term: u64,
    #[prost(oneof = "ProtoLogEntryPayload", tags = "2, 3")]
    payload: Option<ProtoLogEntryPayload>,
}

#[derive(Clone, PartialEq, ::prost::Oneof)]
enum ProtoLogEntryPayload {
    #[prost(message, tag = "2")]
    Data(ProtoDataPayload),
    #[prost(message, tag = "3")]
    Configuration(ProtoQuorumConfiguration),
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoDataPayload {
    #[prost(bytes, repeated, tag = "1")]
    buffers: Vec<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct ProtoQuorumConfiguration {
    #[prost(uint64, repeated, tag = "1")]
    peers: Vec<u64>,
    #[prost(uint64, repeated, tag = "2")]
    prior_peers: Vec<u64>,
    #[prost(bool, tag = "3")]
    transitional: bool,
}

impl From<&QuorumConfiguration> for ProtoQuorumConfiguration {
    fn from(configuration: &QuorumConfiguration) -> Self {
        ProtoQuorumConfiguration {
            peers: configuration.peers().iter().map(NodeId::as_u64).collect(),
            prior_peers: configuration.prior_peers().iter().map(NodeId::as_u64).collect(),
            transitional: configuration.is_transitional(),
        }
    }
}

impl From<ProtoQuorumConfiguration> for QuorumConfiguration {
    fn from(proto: ProtoQuorumConfiguration) -> Self {
        let peers = proto.peers.into_iter().map(NodeId).collect();
        if proto.transitional {
            QuorumConfiguration::transitional(peers, proto.prior_peers.into_iter().map(NodeId).collect())
        } else {
            QuorumConfiguration::new(peers)
        }
    }
}

impl commitlog::Entry for WriteAheadLogEntry {}

impl TryFrom<Vec<u8>> for WriteAheadLogEntry {
    type Error = io::Error;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        match bytes.first() {
            Some(&WAL_ENTRY_FORMAT_VERSION) => {}
            Some(version) => {
                return Err(invalid_data(format!("Unknown log entry format version {}", version)));
            }
            None => return Err(invalid_data("Empty log entry".to_string())),
        }

        let proto = ProtoLogEntry::decode(&bytes[1..]).map_err(|e| invalid_data(e.to_string()))?;
        let payload = match proto.payload {
            Some(ProtoLogEntryPayload::Data(data)) => {
                EntryPayload::Data(data.buffers.into_iter().map(Bytes::from).collect())
            }
            Some(ProtoLogEntryPayload::Configuration(configuration)) => {
                EntryPayload::Configuration(configuration.into())
            }
            None => return Err(invalid_data("Log entry has no payload".to_string())),
        };

        Ok(WriteAheadLogEntry {
            term: Term::new(proto.term),
            payload,
        })
    }
}

impl From<WriteAheadLogEntry> for Vec<u8> {
    fn from(entry: WriteAheadLogEntry) -> Self {
        let payload = match &entry.payload {
            EntryPayload::Data(buffers) => ProtoLogEntryPayload::Data(ProtoDataPayload {
                buffers: buffers.iter().map(|buffer| buffer.to_vec()).collect(),
            }),
            EntryPayload::Configuration(configuration) => {
                ProtoLogEntryPayload::Configuration(configuration.into())
            }
        };
        let proto = ProtoLogEntry {
            term: entry.term.as_u64(),
            payload: Some(payload),
        };

        let mut bytes = Vec::with_capacity(1 + proto.encoded_len());
        bytes.push(WAL_ENTRY_FORMAT_VERSION);
        // Encoding into a Vec can't run out of capacity.
        let _ = proto.encode(&mut bytes);

        bytes
    }
}

pub(crate) fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
