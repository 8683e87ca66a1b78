use crate::replica::NodeId;
use crate::rpc::{RpcEnvelope, Transport};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Process-local network between replicators. Every envelope is serialized and parsed again on
/// its way, like it would be on a real wire.
#[derive(Clone)]
pub struct InMemoryNetwork {
    logger: slog::Logger,
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    inboxes: HashMap<(String, NodeId), mpsc::UnboundedSender<RpcEnvelope>>,
    // Nodes that can neither send nor receive.
    isolated: HashSet<NodeId>,
}

impl InMemoryNetwork {
    pub fn new(logger: slog::Logger) -> Self {
        InMemoryNetwork {
            logger,
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Drop all traffic to and from `node_id` until `heal()`.
    pub fn isolate(&self, node_id: NodeId) {
        slog::info!(self.logger, "Isolating {:?}", node_id);
        self.inner().isolated.insert(node_id);
    }

    pub fn heal(&self, node_id: NodeId) {
        slog::info!(self.logger, "Healing {:?}", node_id);
        self.inner().isolated.remove(&node_id);
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("InMemoryNetwork mutex guard poison")
    }
}

impl Transport for InMemoryNetwork {
    fn send(&self, envelope: RpcEnvelope) {
        let bytes = envelope.encode_to_vec();
        let envelope = match RpcEnvelope::decode_from_slice(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                slog::error!(self.logger, "Dropping envelope that failed to parse: {:?}", e);
                return;
            }
        };

        let mut inner = self.inner();
        if inner.isolated.contains(&envelope.from) || inner.isolated.contains(&envelope.to) {
            slog::debug!(
                self.logger,
                "Partitioned, dropping {} {:?} -> {:?}",
                envelope.message.name(),
                envelope.from,
                envelope.to
            );
            return;
        }

        let key = (envelope.quorum_id.clone(), envelope.to);
        let delivered = match inner.inboxes.get(&key) {
            Some(inbox) => inbox.send(envelope).is_ok(),
            None => false,
        };
        if !delivered {
            // Nobody is listening (yet, or anymore).
            inner.inboxes.remove(&key);
        }
    }

    fn subscribe(&self, quorum_id: &str, node_id: NodeId) -> mpsc::UnboundedReceiver<RpcEnvelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner().inboxes.insert((quorum_id.to_string(), node_id), tx);

        rx
    }
}

/// Records what a replicator sends, so tests can play the rest of the quorum by hand.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct RecordingTransport {
    sent: Arc<Mutex<Vec<RpcEnvelope>>>,
}

#[cfg(test)]
impl RecordingTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Everything sent since the previous call.
    pub(crate) fn take_sent(&self) -> Vec<RpcEnvelope> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

#[cfg(test)]
impl Transport for RecordingTransport {
    fn send(&self, envelope: RpcEnvelope) {
        self.sent.lock().unwrap().push(envelope);
    }

    fn subscribe(&self, _quorum_id: &str, _node_id: NodeId) -> mpsc::UnboundedReceiver<RpcEnvelope> {
        // Nothing is ever delivered.
        let (_tx, rx) = mpsc::unbounded_channel();
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::Term;
    use crate::rpc::{RequestVoteReply, RpcMessage};

    fn envelope(quorum_id: &str, from: u64, to: u64) -> RpcEnvelope {
        RpcEnvelope {
            quorum_id: quorum_id.to_string(),
            to: NodeId(to),
            from: NodeId(from),
            message_id: 1,
            message: RpcMessage::RequestVoteReply(RequestVoteReply {
                term: Term::new(1),
                vote_granted: true,
            }),
        }
    }

    fn network() -> InMemoryNetwork {
        InMemoryNetwork::new(slog::Logger::root(slog::Discard, slog::o!()))
    }

    #[tokio::test]
    async fn delivers_by_quorum_and_node() {
        let network = network();
        let mut q1_node2 = network.subscribe("q1", NodeId(2));
        let mut q2_node2 = network.subscribe("q2", NodeId(2));

        network.send(envelope("q1", 1, 2));
        assert_eq!(q1_node2.recv().await, Some(envelope("q1", 1, 2)));
        assert!(q2_node2.try_recv().is_err());

        // Unknown destinations are dropped quietly.
        network.send(envelope("q1", 1, 3));
    }

    #[tokio::test]
    async fn isolated_nodes_drop_traffic_both_ways() {
        let network = network();
        let mut node1 = network.subscribe("q", NodeId(1));
        let mut node2 = network.subscribe("q", NodeId(2));

        network.isolate(NodeId(2));
        network.send(envelope("q", 1, 2));
        network.send(envelope("q", 2, 1));
        assert!(node1.try_recv().is_err());
        assert!(node2.try_recv().is_err());

        network.heal(NodeId(2));
        network.send(envelope("q", 2, 1));
        assert_eq!(node1.recv().await, Some(envelope("q", 2, 1)));
    }

    #[tokio::test]
    async fn resubscribing_replaces_inbox() {
        let network = network();
        let mut old = network.subscribe("q", NodeId(1));
        let mut new = network.subscribe("q", NodeId(1));

        network.send(envelope("q", 2, 1));
        assert_eq!(new.recv().await, Some(envelope("q", 2, 1)));
        // Old sender was dropped with the replaced entry.
        assert_eq!(old.recv().await, None);
    }
}
