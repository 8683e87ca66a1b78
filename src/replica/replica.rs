use crate::actor::{Callback, WeakActorClient};
use crate::api::{Broadcaster, InstanceEventPublisher, ReplicatorEventKind, ReplicatorState};
use crate::commitlog::{Index, Log};
use crate::replica::election::{ElectionConfig, ElectionState, RealClock};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::peers::{NodeId, ReplicatorInstanceId};
use crate::replica::quorum::{QuorumConfiguration, QuorumTracker};
use crate::replica::replica_api::{ReceiptError, ReplicatorReceipt};
use crate::replica::write_ahead_log::{
    CommitNotifier, EntryPayload, IndexCommitNotice, WriteAheadLog, WriteAheadLogEntry,
};
use crate::rpc::{RpcEnvelope, RpcMessage, Transport};
use bytes::Bytes;
use std::collections::BTreeSet;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

// Unique within the process, so a reply meant for a previous replicator instance on the same
// node can never be mistaken for a reply to ours.
static NEXT_MESSAGE_ID: AtomicU64 = AtomicU64::new(1);

pub(super) fn next_message_id() -> u64 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
}

pub(crate) struct ReplicaConfig<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    pub logger: slog::Logger,
    pub instance: ReplicatorInstanceId,
    pub log: L,
    pub local_state: S,
    // Used when the log holds no configuration entry.
    pub bootstrap_configuration: QuorumConfiguration,
    pub transport: Arc<dyn Transport>,
    pub actor_client: WeakActorClient,
    pub state_broadcaster: Broadcaster<ReplicatorState>,
    pub event_publisher: InstanceEventPublisher,
    pub commit_notice_broadcaster: Broadcaster<IndexCommitNotice>,
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
    pub append_entries_timeout: Duration,
    pub max_entries_per_append: usize,
}

/// A quorum change this node started as leader, and whose caller still waits for the outcome.
pub(super) struct PendingQuorumChange {
    pub(super) transitional: QuorumConfiguration,
    pub(super) transitional_index: Index,
    pub(super) final_index: Option<Index>,
    pub(super) completion: Callback<QuorumConfiguration, ReceiptError>,
}

pub(crate) struct Replica<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    pub(super) logger: slog::Logger,
    pub(super) instance: ReplicatorInstanceId,
    pub(super) local_state: S,
    pub(super) election_state: ElectionState,
    pub(super) wal: WriteAheadLog<L>,
    pub(super) quorum: QuorumTracker,
    pub(super) pending_change: Option<PendingQuorumChange>,
    pub(super) commit_notifier: CommitNotifier,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) state_broadcaster: Broadcaster<ReplicatorState>,
    pub(super) event_publisher: InstanceEventPublisher,
    pub(super) commit_notice_broadcaster: Broadcaster<IndexCommitNotice>,
    pub(super) clock: RealClock,
    pub(super) append_entries_timeout: Duration,
    pub(super) max_entries_per_append: usize,
}

impl<L, S> Replica<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    /// Fails if the existing log can't be read.
    pub(crate) fn new(config: ReplicaConfig<L, S>) -> Result<Self, io::Error> {
        let wal = WriteAheadLog::open(config.log)?;
        let mut quorum = QuorumTracker::new(config.bootstrap_configuration);
        for (index, configuration) in wal.configurations()? {
            quorum.record(index, configuration);
        }

        let election_state = ElectionState::new_follower(
            ElectionConfig {
                my_node_id: config.instance.node_id,
                leader_heartbeat_duration: config.leader_heartbeat_duration,
                follower_min_timeout: config.follower_min_timeout,
                follower_max_timeout: config.follower_max_timeout,
            },
            config.actor_client,
            config.state_broadcaster.clone(),
        );

        Ok(Replica {
            logger: config.logger,
            commit_notifier: CommitNotifier::new(config.instance.clone()),
            instance: config.instance,
            local_state: config.local_state,
            election_state,
            wal,
            quorum,
            pending_change: None,
            transport: config.transport,
            state_broadcaster: config.state_broadcaster,
            event_publisher: config.event_publisher,
            commit_notice_broadcaster: config.commit_notice_broadcaster,
            clock: RealClock,
            append_entries_timeout: config.append_entries_timeout,
            max_entries_per_append: config.max_entries_per_append,
        })
    }

    pub(super) fn me(&self) -> NodeId {
        self.instance.node_id
    }

    /// Observers (nodes outside the current configuration) never campaign and never vote.
    pub(super) fn is_voter(&self) -> bool {
        self.quorum.current().contains(self.me())
    }

    pub(crate) fn start(&mut self) {
        slog::info!(
            self.logger,
            "Starting with term {:?}, configuration {:?}, latest log entry {:?}",
            self.local_state.current_term(),
            self.quorum.current(),
            self.wal.latest_entry()
        );
        self.event_publisher.publish(ReplicatorEventKind::QuorumStart);
        self.election_state.arm_follower_timer(self.is_voter());
    }

    pub(crate) fn shutdown(&mut self) {
        if let Some(pending_change) = self.pending_change.take() {
            pending_change.completion.send(Err(ReceiptError::Cancelled));
        }
        self.election_state.stop();
        self.state_broadcaster.close();
        self.event_publisher.close();
        self.commit_notice_broadcaster.close();
    }

    pub(crate) fn quorum_configuration(&self) -> QuorumConfiguration {
        self.quorum.current().clone()
    }

    pub(crate) fn handle_log_data(&mut self, buffers: Vec<Bytes>) -> Result<Option<ReplicatorReceipt>, ReceiptError> {
        if !self.election_state.is_leader() {
            slog::debug!(
                self.logger,
                "Not leader, dropping data. Current leader: {:?}",
                self.election_state.current_leader()
            );
            return Ok(None);
        }

        // > If command received from client: append entry to local log
        let term = self.local_state.current_term();
        let receipt = self
            .append_as_leader(WriteAheadLogEntry::data(term, buffers))
            .map_err(ReceiptError::LocalIoError)?;
        self.after_leader_append();

        Ok(Some(receipt))
    }

    pub(crate) fn handle_change_quorum(
        &mut self,
        peers: BTreeSet<NodeId>,
        receipt: Callback<Option<ReplicatorReceipt>, ReceiptError>,
        completion: Callback<QuorumConfiguration, ReceiptError>,
    ) {
        if !self.election_state.is_leader() {
            receipt.send(Ok(None));
            completion.send(Err(ReceiptError::NotLeader));
            return;
        }
        if peers.is_empty() {
            receipt.send(Err(ReceiptError::EmptyQuorum));
            completion.send(Err(ReceiptError::EmptyQuorum));
            return;
        }
        if self.is_quorum_change_in_progress() {
            receipt.send(Err(ReceiptError::ChangeInProgress));
            completion.send(Err(ReceiptError::ChangeInProgress));
            return;
        }
        let transitional = match self.quorum.current().transition_to(peers) {
            Some(transitional) => transitional,
            None => {
                receipt.send(Err(ReceiptError::UnchangedQuorum));
                completion.send(Err(ReceiptError::UnchangedQuorum));
                return;
            }
        };

        slog::info!(self.logger, "Changing quorum to {:?}", transitional);
        let term = self.local_state.current_term();
        match self.append_as_leader(WriteAheadLogEntry::configuration(term, transitional.clone())) {
            Ok(appended) => {
                self.pending_change = Some(PendingQuorumChange {
                    transitional,
                    transitional_index: appended.index,
                    final_index: None,
                    completion,
                });
                receipt.send(Ok(Some(appended)));
                self.after_leader_append();
            }
            Err(e) => {
                receipt.send(Err(ReceiptError::LocalIoError(e)));
                completion.send(Err(ReceiptError::Abandoned));
            }
        }
    }

    /// One change at a time: the current configuration must be final and committed.
    fn is_quorum_change_in_progress(&self) -> bool {
        if self.pending_change.is_some() || self.quorum.current().is_transitional() {
            return true;
        }
        match (self.quorum.current_index(), self.wal.commit_index()) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(configuration_index), Some(commit_index)) => configuration_index > commit_index,
        }
    }

    /// Appends to our log. Configuration entries take effect right away.
    pub(super) fn append_as_leader(&mut self, entry: WriteAheadLogEntry) -> Result<ReplicatorReceipt, io::Error> {
        let term = entry.term;
        let configuration = entry.as_configuration().cloned();
        let index = self.wal.append(entry)?;

        if let Some(configuration) = configuration {
            self.quorum.record(index, configuration);
            // New members start from this entry. Whatever precedes it follows via rewinds.
            let peer_ids = self.quorum.current().all_peers();
            self.election_state.sync_leader_peers(&peer_ids, index.checked_minus(1));
        }

        Ok(ReplicatorReceipt { term, index })
    }

    pub(super) fn after_leader_append(&mut self) {
        // A single node quorum commits without hearing from anyone.
        self.try_advance_leader_commit_index();
        self.replicate_to_all_peers();
    }

    pub(crate) fn handle_inbound(&mut self, envelope: RpcEnvelope) {
        if envelope.quorum_id != self.instance.quorum_id || envelope.to != self.me() {
            slog::warn!(
                self.logger,
                "Dropping {} misaddressed to {}/{:?}",
                envelope.message.name(),
                envelope.quorum_id,
                envelope.to
            );
            return;
        }
        slog::debug!(self.logger, "ServerWire - {:?}", envelope);

        match &envelope.message {
            RpcMessage::RequestVote(request) => {
                let reply = self.handle_request_vote(request);
                self.transport
                    .send(envelope.reply(RpcMessage::RequestVoteReply(reply)));
            }
            RpcMessage::RequestVoteReply(reply) => {
                self.handle_request_vote_reply(envelope.from, reply);
            }
            RpcMessage::AppendEntries(request) => {
                if let Some(reply) = self.handle_append_entries(request) {
                    self.transport
                        .send(envelope.reply(RpcMessage::AppendEntriesReply(reply)));
                }
            }
            RpcMessage::AppendEntriesReply(reply) => {
                self.handle_append_entries_reply(envelope.from, envelope.message_id, reply);
            }
        }
    }

    // ---------------- Commit ----------------

    /// Announces newly committed entries, and moves quorum changes along.
    pub(super) fn apply_committed_entries(&mut self) {
        let applied = match self.wal.apply_all_committed_entries() {
            Ok(applied) => applied,
            Err(e) => {
                self.storage_failure("applying committed entries", e);
                return;
            }
        };
        if applied.is_empty() {
            return;
        }

        let committed: Vec<(Index, Term)> = applied.iter().map(|(index, entry)| (*index, entry.term)).collect();
        for notice in self.commit_notifier.notices(&committed) {
            slog::info!(self.logger, "Committed up to {:?} (term {:?})", notice.up_to_and_including, notice.term);
            self.commit_notice_broadcaster.publish(notice);
        }

        for (index, entry) in applied {
            if let EntryPayload::Configuration(configuration) = entry.payload {
                if configuration.is_transitional() {
                    continue;
                }
                slog::info!(self.logger, "Quorum configuration {:?} committed at {:?}", configuration, index);
                if matches!(&self.pending_change, Some(pending) if pending.final_index == Some(index)) {
                    if let Some(pending_change) = self.pending_change.take() {
                        pending_change.completion.send(Ok(configuration.clone()));
                    }
                }
                self.event_publisher
                    .publish(ReplicatorEventKind::QuorumConfigurationCommitted { configuration });
            }
        }

        if self.election_state.is_leader() {
            self.continue_quorum_change();
        }
    }

    /// Leader only. Appends the final configuration once the transitional one committed, and
    /// steps down once the final one committed without us.
    pub(super) fn continue_quorum_change(&mut self) {
        let configuration_committed = match (self.quorum.current_index(), self.wal.commit_index()) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(configuration_index), Some(commit_index)) => configuration_index <= commit_index,
        };
        if !configuration_committed {
            return;
        }

        if self.quorum.current().is_transitional() {
            self.append_final_configuration();
            self.after_leader_append();
        } else if !self.quorum.current().contains(self.me()) {
            slog::info!(self.logger, "Removed from the quorum. Stepping down.");
            self.become_follower(None);
        }
    }

    pub(super) fn append_final_configuration(&mut self) {
        let final_configuration = self.quorum.current().complete_transition();
        slog::info!(self.logger, "Completing quorum change to {:?}", final_configuration);

        let term = self.local_state.current_term();
        match self.append_as_leader(WriteAheadLogEntry::configuration(term, final_configuration)) {
            Ok(appended) => {
                if let Some(pending_change) = self.pending_change.as_mut() {
                    pending_change.final_index.replace(appended.index);
                }
            }
            Err(e) => self.storage_failure("appending final configuration", e),
        }
    }

    // ---------------- Misc ----------------

    pub(super) fn send_to(&self, peer_id: NodeId, message_id: u64, message: RpcMessage) {
        let envelope = RpcEnvelope {
            quorum_id: self.instance.quorum_id.clone(),
            to: peer_id,
            from: self.instance.node_id,
            message_id,
            message,
        };
        slog::debug!(self.logger, "ClientWire - {:?}", envelope);
        self.transport.send(envelope);
    }

    pub(super) fn storage_failure(&self, doing: &str, e: io::Error) {
        slog::error!(self.logger, "Storage failure while {}: {:?}", doing, e);
        self.event_publisher.publish(ReplicatorEventKind::QuorumFailure {
            reason: format!("Storage failure while {}: {}", doing, e),
        });
    }
}
