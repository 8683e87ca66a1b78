use crate::commitlog::Log;
use crate::replica::{
    LeaderTimerTick, NodeId, PersistentLocalState, QuorumConfiguration, ReceiptError, Replica, ReplicatorReceipt,
    WriteAheadLogEntry,
};
use crate::rpc::RpcEnvelope;
use bytes::Bytes;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

// v1 Design choice: Disk interaction will be synchronous. Future improvement: There should be a
//                   Disk Actor.
#[derive(Debug)]
pub(crate) enum Event {
    // Leader: Write to disk, eagerly replicate to peers. Respond with the receipt.
    // Candidate/Follower: Respond with no receipt.
    LogData(Vec<Bytes>, Callback<Option<ReplicatorReceipt>, ReceiptError>),

    // Leader: Write transitional configuration to disk, respond with the receipt. Complete the
    //         change once the final configuration commits.
    // Candidate/Follower: Respond with no receipt.
    ChangeQuorum {
        peers: BTreeSet<NodeId>,
        receipt: Callback<Option<ReplicatorReceipt>, ReceiptError>,
        completion: Callback<QuorumConfiguration, ReceiptError>,
    },

    GetQuorumConfiguration(oneshot::Sender<QuorumConfiguration>),

    // RequestVote, AppendEntries, and their replies from peers.
    Inbound(RpcEnvelope),

    // Leader: Call AppendEntries on the peer with all local un-replicated entries.
    // Candidate/Follower: Discard.
    LeaderTimer(LeaderTimerTick),

    // Leader: Discard.
    // Candidate/Follower: Transition to candidate. Trigger new election.
    FollowerTimeout,

    Shutdown,
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Error>(pub(crate) oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub(crate) fn send(self, message: Result<O, E>) {
        // Caller stopped waiting, nothing to do.
        let _ = self.0.send(message);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Replicator event loop actor exited")]
pub(crate) struct ActorExited;

/// Held by the replicator handle. The event loop runs as long as one of these is alive.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

/// Held by timers and the inbound pump, which shouldn't keep the event loop alive.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn log_data(
        &self,
        buffers: Vec<Bytes>,
    ) -> Result<oneshot::Receiver<Result<Option<ReplicatorReceipt>, ReceiptError>>, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::LogData(buffers, Callback(tx))).await?;

        Ok(rx)
    }

    pub(crate) async fn change_quorum(
        &self,
        peers: BTreeSet<NodeId>,
    ) -> Result<
        (
            oneshot::Receiver<Result<Option<ReplicatorReceipt>, ReceiptError>>,
            oneshot::Receiver<Result<QuorumConfiguration, ReceiptError>>,
        ),
        ActorExited,
    > {
        let (receipt_tx, receipt_rx) = oneshot::channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        self.send(Event::ChangeQuorum {
            peers,
            receipt: Callback(receipt_tx),
            completion: Callback(completion_tx),
        })
        .await?;

        Ok((receipt_rx, completion_rx))
    }

    pub(crate) async fn quorum_configuration(&self) -> Result<QuorumConfiguration, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::GetQuorumConfiguration(tx)).await?;

        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn shutdown(&self) -> Result<(), ActorExited> {
        self.send(Event::Shutdown).await
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        self.sender.send(event).await.map_err(|_| ActorExited)
    }
}

impl WeakActorClient {
    pub(crate) async fn follower_timeout(&self) -> Result<(), ActorExited> {
        self.send(Event::FollowerTimeout).await
    }

    pub(crate) async fn leader_timer(&self, tick: LeaderTimerTick) -> Result<(), ActorExited> {
        self.send(Event::LeaderTimer(tick)).await
    }

    pub(crate) async fn inbound(&self, envelope: RpcEnvelope) -> Result<(), ActorExited> {
        self.send(Event::Inbound(envelope)).await
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        match self.sender.upgrade() {
            Some(sender) => sender.send(event).await.map_err(|_| ActorExited),
            None => Err(ActorExited),
        }
    }
}

/// Forwards envelopes from the transport into the event loop until either side goes away.
pub(crate) async fn forward_inbound(
    mut inbound: mpsc::UnboundedReceiver<RpcEnvelope>,
    actor_client: WeakActorClient,
) {
    while let Some(envelope) = inbound.recv().await {
        if actor_client.inbound(envelope).await.is_err() {
            return;
        }
    }
}

/// ReplicatorActor is replicator logic in actor model.
pub(crate) struct ReplicatorActor<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: Replica<L, S>,
}

impl<L, S> ReplicatorActor<L, S>
where
    L: Log<WriteAheadLogEntry> + Send + 'static,
    S: PersistentLocalState + Send + 'static,
{
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Event>, replica: Replica<L, S>) -> Self {
        ReplicatorActor {
            logger,
            receiver,
            replica,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        self.replica.start();

        while let Some(event) = self.receiver.recv().await {
            if let EventLoopControl::Exit = self.handle_event(event) {
                break;
            }
        }

        // Either asked to shut down, or every handle is gone.
        self.replica.shutdown();
        slog::info!(self.logger, "Event loop exited");
    }

    // This must NOT be async. Any long running work must be spawned on another actor
    // and/or come as a callback to this actor.
    fn handle_event(&mut self, event: Event) -> EventLoopControl {
        match event {
            Event::LogData(buffers, callback) => {
                let result = self.replica.handle_log_data(buffers);
                callback.send(result);
            }
            Event::ChangeQuorum {
                peers,
                receipt,
                completion,
            } => {
                self.replica.handle_change_quorum(peers, receipt, completion);
            }
            Event::GetQuorumConfiguration(tx) => {
                let _ = tx.send(self.replica.quorum_configuration());
            }
            Event::Inbound(envelope) => {
                self.replica.handle_inbound(envelope);
            }
            Event::LeaderTimer(tick) => {
                self.replica.handle_leader_timer(tick);
            }
            Event::FollowerTimeout => {
                self.replica.handle_follower_timeout();
            }
            Event::Shutdown => return EventLoopControl::Exit,
        }

        EventLoopControl::Continue
    }
}

enum EventLoopControl {
    Continue,
    Exit,
}
