use crate::actor::{ActorClient, Callback, Event};
use crate::api::{Broadcaster, InstanceEventPublisher, ReplicatorEventKind, ReplicatorInstanceEvent, ReplicatorState, Subscription};
use crate::commitlog::{InMemoryLog, Index};
use crate::replica::replica::{Replica, ReplicaConfig};
use crate::replica::{
    IndexCommitNotice, NodeId, QuorumConfiguration, ReceiptError, ReplicatorInstanceId, ReplicatorReceipt, Term,
    VolatileLocalState, WriteAheadLogEntry,
};
use crate::rpc::{AppendEntriesReply, RecordingTransport, RequestVote, RequestVoteReply, RpcEnvelope, RpcMessage};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

pub(super) const QUORUM_ID: &str = "test-quorum";

/// A replica wired to a transport that only records what it sends.
pub(super) struct TestReplica {
    pub(super) replica: Replica<InMemoryLog<WriteAheadLogEntry>, VolatileLocalState>,
    pub(super) transport: Arc<RecordingTransport>,
    pub(super) local_state: VolatileLocalState,
    pub(super) events: Subscription<ReplicatorInstanceEvent>,
    pub(super) notices: Subscription<IndexCommitNotice>,
    pub(super) states: Subscription<ReplicatorState>,
    // Timers deliver here, nobody reads them.
    _actor: (ActorClient, mpsc::Receiver<Event>),
}

pub(super) fn create_replica(me: u64, peers: &[u64]) -> TestReplica {
    let logger = slog::Logger::root(slog::Discard, slog::o!());
    let instance = ReplicatorInstanceId::new(QUORUM_ID, NodeId(me));
    let transport = Arc::new(RecordingTransport::new());
    let local_state = VolatileLocalState::new(NodeId(me));
    let (actor_client, rx) = ActorClient::new(64);

    let state_broadcaster = Broadcaster::new();
    let event_broadcaster = Broadcaster::new();
    let commit_notice_broadcaster = Broadcaster::new();
    let events = event_broadcaster.subscribe();
    let notices = commit_notice_broadcaster.subscribe();
    let states = state_broadcaster.subscribe();

    let replica = Replica::new(ReplicaConfig {
        logger,
        instance: instance.clone(),
        log: InMemoryLog::create().unwrap(),
        local_state: local_state.clone(),
        bootstrap_configuration: QuorumConfiguration::new(node_ids(peers)),
        transport: transport.clone(),
        actor_client: actor_client.weak(),
        state_broadcaster,
        event_publisher: InstanceEventPublisher::new(instance, event_broadcaster),
        commit_notice_broadcaster,
        // Long enough that no timer fires during a test.
        leader_heartbeat_duration: Duration::from_secs(100),
        follower_min_timeout: Duration::from_secs(500),
        follower_max_timeout: Duration::from_secs(600),
        append_entries_timeout: Duration::from_secs(300),
        max_entries_per_append: 64,
    })
    .unwrap();

    TestReplica {
        replica,
        transport,
        local_state,
        events,
        notices,
        states,
        _actor: (actor_client, rx),
    }
}

pub(super) fn node_ids(ids: &[u64]) -> Vec<NodeId> {
    ids.iter().copied().map(NodeId).collect()
}

pub(super) fn envelope(from: u64, to: u64, message_id: u64, message: RpcMessage) -> RpcEnvelope {
    RpcEnvelope {
        quorum_id: QUORUM_ID.to_string(),
        to: NodeId(to),
        from: NodeId(from),
        message_id,
        message,
    }
}

pub(super) fn request_vote(from: u64, term: u64, last_log_entry: Option<(u64, u64)>) -> RpcEnvelope {
    envelope(
        from,
        1,
        1,
        RpcMessage::RequestVote(RequestVote {
            term: Term::new(term),
            candidate_id: NodeId(from),
            last_log_entry: last_log_entry.map(|(t, i)| (Term::new(t), Index::new(i))),
        }),
    )
}

pub(super) fn vote_granted(from: u64, to: u64, term: u64) -> RpcEnvelope {
    envelope(
        from,
        to,
        1,
        RpcMessage::RequestVoteReply(RequestVoteReply {
            term: Term::new(term),
            vote_granted: true,
        }),
    )
}

/// The recipient's successful reply to the AppendEntries in `request`.
pub(super) fn appended(request: &RpcEnvelope, term: u64) -> RpcEnvelope {
    envelope(
        request.to.as_u64(),
        request.from.as_u64(),
        request.message_id,
        RpcMessage::AppendEntriesReply(AppendEntriesReply {
            term: Term::new(term),
            success: true,
            next_log_index: None,
        }),
    )
}

pub(super) fn data(term: u64, payload: &'static [u8]) -> WriteAheadLogEntry {
    WriteAheadLogEntry::data(Term::new(term), vec![Bytes::from_static(payload)])
}

pub(super) fn single_reply(test: &TestReplica) -> RpcEnvelope {
    let mut sent = test.transport.take_sent();
    assert_eq!(sent.len(), 1, "Expected exactly one message, got {:?}", sent);
    sent.remove(0)
}

pub(super) async fn next_event(test: &mut TestReplica) -> ReplicatorEventKind {
    test.events.next().await.unwrap().kind
}

/// Skips events until one matches.
pub(super) async fn expect_event<F>(test: &mut TestReplica, mut matches: F) -> ReplicatorEventKind
where
    F: FnMut(&ReplicatorEventKind) -> bool,
{
    loop {
        let kind = next_event(test).await;
        if matches(&kind) {
            return kind;
        }
    }
}

/// Turns node 1 of {1, 2, 3} into the leader of term 1, with node 2's vote.
pub(super) async fn elect_leader(test: &mut TestReplica) {
    test.replica.start();
    test.replica.handle_follower_timeout();
    let vote_requests = test.transport.take_sent();
    assert_eq!(vote_requests.len(), 2);
    test.replica.handle_inbound(vote_granted(2, 1, 1));
    assert!(test.replica.election_state.is_leader());
}

pub(super) type ChangeOutcome = (
    oneshot::Receiver<Result<Option<ReplicatorReceipt>, ReceiptError>>,
    oneshot::Receiver<Result<QuorumConfiguration, ReceiptError>>,
);

pub(super) fn change_quorum(test: &mut TestReplica, peers: &[u64]) -> ChangeOutcome {
    let (receipt_tx, receipt_rx) = oneshot::channel();
    let (completion_tx, completion_rx) = oneshot::channel();
    test.replica.handle_change_quorum(
        node_ids(peers).into_iter().collect(),
        Callback(receipt_tx),
        Callback(completion_tx),
    );

    (receipt_rx, completion_rx)
}
