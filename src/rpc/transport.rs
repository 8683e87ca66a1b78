use crate::replica::NodeId;
use crate::rpc::RpcEnvelope;
use tokio::sync::mpsc;

/// Delivers envelopes between replicators. Delivery is best effort: envelopes may be dropped,
/// and the state machine recovers through timers and retries.
pub trait Transport: Send + Sync + 'static {
    fn send(&self, envelope: RpcEnvelope);

    /// Inbound envelopes addressed to `node_id` in `quorum_id`. Subscribing again replaces the
    /// previous subscription.
    fn subscribe(&self, quorum_id: &str, node_id: NodeId) -> mpsc::UnboundedReceiver<RpcEnvelope>;
}
