use crate::api::{ReplicatorEventKind, ReplicatorState};
use crate::commitlog::{Index, Log};
use crate::replica::election::{Clock, InFlightAppendEntries};
use crate::replica::local_state::PersistentLocalState;
use crate::replica::peers::NodeId;
use crate::replica::replica::{next_message_id, Replica};
use crate::replica::replica_api::LeaderTimerTick;
use crate::replica::write_ahead_log::{EntryPayload, WriteAheadLogEntry};
use crate::rpc::{AppendEntries, AppendEntriesReply, RpcMessage};
use std::collections::BTreeSet;
use std::{cmp, io};

impl<L, S> Replica<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    // ---------------- Replication (follower) ----------------

    /// Returns None if we couldn't process the request at all.
    pub(super) fn handle_append_entries(&mut self, request: &AppendEntries) -> Option<AppendEntriesReply> {
        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if request.term < current_term {
            return Some(self.append_entries_reply(false));
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        let learned_leader = if self.observe_term(request.term, Some(request.leader_id)) {
            true
        } else {
            match self.election_state.role() {
                ReplicatorState::Leader => {
                    slog::error!(
                        self.logger,
                        "{:?} claims to lead term {:?}, but so do I. Ignoring.",
                        request.leader_id,
                        request.term
                    );
                    return Some(self.append_entries_reply(false));
                }
                // > If AppendEntries RPC received from new leader: convert to follower
                ReplicatorState::Candidate => {
                    self.become_follower(Some(request.leader_id));
                    true
                }
                ReplicatorState::Follower => self.election_state.set_leader_if_unknown(request.leader_id),
            }
        };
        if learned_leader {
            slog::info!(self.logger, "Following {:?} in term {:?}", request.leader_id, request.term);
            self.event_publisher.publish(ReplicatorEventKind::LeaderElected {
                new_leader: request.leader_id,
                term: request.term,
            });
        }

        self.election_state.reset_timeout_if_follower();

        match self.try_append_entries(request) {
            Ok(success) => Some(self.append_entries_reply(success)),
            Err(e) => {
                self.storage_failure("handling AppendEntries", e);
                None
            }
        }
    }

    fn append_entries_reply(&self, success: bool) -> AppendEntriesReply {
        AppendEntriesReply {
            term: self.local_state.current_term(),
            success,
            next_log_index: Some(self.wal.next_index()),
        }
    }

    /// Returns false if our log doesn't match the leader's before the new entries.
    fn try_append_entries(&mut self, request: &AppendEntries) -> Result<bool, io::Error> {
        // 2. Reply false if [my] log doesn't contain an entry at [leader's]
        // prevLogIndex whose term matches [leader's] prevLogTerm (§5.3)
        if let Some((leader_previous_term, leader_previous_index)) = request.previous_log_entry {
            match self.wal.term_at(leader_previous_index)? {
                Some(my_term) if my_term == leader_previous_term => {}
                _ => {
                    slog::info!(
                        self.logger,
                        "Missing leader's previous log entry {:?}.",
                        request.previous_log_entry
                    );
                    return Ok(false);
                }
            }
        }

        // 3. If [my] existing entry conflicts with [leader's new entries]
        // (same index but different terms), delete [my] existing entry and
        // all that follow it (§5.3)
        // 4. Append any new entries not already in the log
        let was_voter = self.is_voter();
        let mut next_entry_index = match request.previous_log_entry {
            None => Index::start_index(),
            Some((_, leader_previous_index)) => leader_previous_index.plus(1),
        };
        let mut new_entries = request.entries.iter();
        let mut first_missing = None;
        for new_entry in new_entries.by_ref() {
            match self.wal.term_at(next_entry_index)? {
                Some(existing_term) if existing_term == new_entry.term => {
                    // 4. (no-op)
                    next_entry_index = next_entry_index.plus(1);
                }
                Some(_) => {
                    // 3. (delete)
                    slog::info!(self.logger, "Truncating conflicting log starting at {:?}", next_entry_index);
                    self.wal.truncate(next_entry_index)?;
                    self.quorum.truncate(next_entry_index);
                    first_missing = Some(new_entry);
                    break;
                }
                None => {
                    first_missing = Some(new_entry);
                    break;
                }
            }
        }

        // 4. (append)
        if let Some(first_missing) = first_missing {
            let to_append: Vec<WriteAheadLogEntry> = std::iter::once(first_missing).chain(new_entries).cloned().collect();
            let appended_indexes = self.wal.append_all(to_append.clone())?;
            assert_eq!(
                appended_indexes.first(),
                Some(&next_entry_index),
                "Appended log entries to unexpected index."
            );
            for (index, entry) in appended_indexes.into_iter().zip(to_append) {
                if let EntryPayload::Configuration(configuration) = entry.payload {
                    self.quorum.record(index, configuration);
                }
                next_entry_index = index.plus(1);
            }
        }

        let is_voter = self.is_voter();
        if is_voter != was_voter {
            slog::info!(self.logger, "Voting membership changed, voter: {}", is_voter);
            self.election_state.arm_follower_timer(is_voter);
        }

        // 5. If leaderCommit > commitIndex, set commitIndex = min(leaderCommit, index of last new entry)
        if let (Some(leader_commit_index), Some(index_of_last_new_entry)) =
            (request.leader_commit_index, next_entry_index.checked_minus(1))
        {
            let new_commit_index = cmp::min(leader_commit_index, index_of_last_new_entry);
            if self.wal.ratchet_fwd_commit_index_if_changed(new_commit_index) {
                self.apply_committed_entries();
            }
        }

        Ok(true)
    }

    // ---------------- Replication (leader) ----------------

    pub(super) fn handle_append_entries_reply(&mut self, peer_id: NodeId, message_id: u64, reply: &AppendEntriesReply) {
        let logger = self
            .logger
            .new(slog::o!("Peer" => peer_id.as_u64(), "MessageId" => message_id));
        slog::debug!(logger, "AE reply from peer: {:?}", reply);

        if self.observe_term(reply.term, None) {
            slog::warn!(logger, "Rejected by peer because my term is stale.");
            return;
        }

        let peer_state = match self
            .election_state
            .leader_state_mut()
            .and_then(|leader_state| leader_state.peer_state_mut(&peer_id))
        {
            Some(peer_state) => peer_state,
            None => {
                slog::info!(logger, "No longer leader, or no longer replicating to peer.");
                return;
            }
        };

        let in_flight = match peer_state.finish_request(message_id) {
            Some(in_flight) => in_flight,
            None => {
                slog::info!(logger, "Reply doesn't match the outstanding request, it's stale or expired.");
                return;
            }
        };

        if reply.success {
            peer_state.update_log(in_flight.previous_log_entry, in_flight.num_entries);
        } else {
            slog::info!(logger, "Peer is missing previous log entry {:?}", in_flight.previous_log_entry);
            peer_state.rewind_log(&logger, reply.next_log_index);
        }
        let (next_index, _) = peer_state.next_and_previous_log_index();

        if reply.success {
            self.try_advance_leader_commit_index();
        }

        // > If last log index ≥ nextIndex for a follower: send
        // > AppendEntries RPC with log entries starting at nextIndex
        if matches!(self.wal.latest_index(), Some(latest) if latest >= next_index) {
            self.send_append_entries_logging_errors(peer_id);
        }
    }

    pub(crate) fn handle_leader_timer(&mut self, tick: LeaderTimerTick) {
        let current_term = self.local_state.current_term();
        if current_term != tick.term {
            slog::warn!(
                self.logger,
                "Received leader heartbeat for outdated term {:?}, current term: {:?}",
                tick.term,
                current_term
            );
            return;
        }

        self.send_append_entries_logging_errors(tick.peer_id);
    }

    pub(super) fn replicate_to_all_peers(&mut self) {
        let peer_ids = match self.election_state.leader_state() {
            Some(leader_state) => leader_state.peer_ids(),
            None => return,
        };
        for peer_id in peer_ids {
            self.send_append_entries_logging_errors(peer_id);
        }
    }

    fn send_append_entries_logging_errors(&mut self, peer_id: NodeId) {
        match self.try_send_append_entries(peer_id) {
            Ok(_) => {}
            Err(HandleLeaderTimerError::NoLongerLeader) => {
                slog::info!(self.logger, "Received leader timer event but no longer leader.")
            }
            Err(HandleLeaderTimerError::PeerConcurrencyThrottle) => {
                slog::debug!(self.logger, "Request to peer {:?} already outstanding", peer_id)
            }
            Err(HandleLeaderTimerError::DiskRead(index, ioe)) => {
                slog::error!(self.logger, "Failed to read log entry at index {:?}: {:?}", index, ioe);
                self.event_publisher.publish(ReplicatorEventKind::QuorumFailure {
                    reason: format!("Failed to read log entry at index {:?}: {}", index, ioe),
                });
            }
            Err(HandleLeaderTimerError::UnexpectedMissingLogEntry(index)) => {
                slog::error!(
                    self.logger,
                    "LeaderStateTracker is tracking index {:?}, but entry is missing from log.",
                    index
                );
            }
            Err(HandleLeaderTimerError::LeaderStateMissingPeer {
                leader_state_tracker_peers,
            }) => {
                slog::warn!(
                    self.logger,
                    "Peer {:?} is not tracked by LeaderStateTracker. Tracked peers: {:?}",
                    peer_id,
                    leader_state_tracker_peers,
                )
            }
        }
    }

    fn try_send_append_entries(&mut self, peer_id: NodeId) -> Result<(), HandleLeaderTimerError> {
        let current_term = self.local_state.current_term();
        let leader_state = self
            .election_state
            .leader_state_mut()
            .ok_or(HandleLeaderTimerError::NoLongerLeader)?;
        let peer_state = match leader_state.peer_state_mut(&peer_id) {
            Some(peer_state) => peer_state,
            None => {
                return Err(HandleLeaderTimerError::LeaderStateMissingPeer {
                    leader_state_tracker_peers: leader_state.peer_ids(),
                })
            }
        };

        let now = self.clock.now();
        if peer_state.has_outstanding_request(now, self.append_entries_timeout) {
            return Err(HandleLeaderTimerError::PeerConcurrencyThrottle);
        }

        let (next_index, opt_previous_index) = peer_state.next_and_previous_log_index();
        let previous_log_entry = match opt_previous_index {
            None => None,
            Some(previous_index) => match self.wal.term_at(previous_index) {
                Ok(Some(term)) => Some((term, previous_index)),
                Ok(None) => return Err(HandleLeaderTimerError::UnexpectedMissingLogEntry(previous_index)),
                Err(e) => return Err(HandleLeaderTimerError::DiskRead(previous_index, e)),
            },
        };
        let entries = self
            .wal
            .read_from(next_index, self.max_entries_per_append)
            .map_err(|e| HandleLeaderTimerError::DiskRead(next_index, e))?;

        let message_id = next_message_id();
        peer_state.start_request(
            InFlightAppendEntries {
                message_id,
                sent_at: now,
                previous_log_entry: opt_previous_index,
                num_entries: entries.len(),
            },
            self.append_entries_timeout,
        );

        let request = RpcMessage::AppendEntries(AppendEntries {
            term: current_term,
            leader_id: self.instance.node_id,
            previous_log_entry,
            leader_commit_index: self.wal.commit_index(),
            entries,
        });
        self.send_to(peer_id, message_id, request);

        Ok(())
    }

    pub(super) fn try_advance_leader_commit_index(&mut self) {
        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        let tentative_new_commit_index = match self.election_state.leader_state() {
            None => return,
            Some(leader_state) => {
                let me = self.instance.node_id;
                let my_latest_index = self.wal.latest_index();
                self.quorum.current().committed_index(|peer_id| {
                    if peer_id == me {
                        my_latest_index
                    } else {
                        leader_state.matched(&peer_id)
                    }
                })
            }
        };
        let tentative_new_commit_index = match tentative_new_commit_index {
            Some(index) => index,
            None => return,
        };

        match self
            .wal
            .ratchet_fwd_commit_index_if_valid(tentative_new_commit_index, self.local_state.current_term())
        {
            Ok(true) => self.apply_committed_entries(),
            Ok(false) => {}
            Err(e) => self.storage_failure("confirming new commit index", e),
        }
    }
}

enum HandleLeaderTimerError {
    NoLongerLeader,
    PeerConcurrencyThrottle,
    DiskRead(Index, io::Error),
    UnexpectedMissingLogEntry(Index),
    LeaderStateMissingPeer {
        leader_state_tracker_peers: BTreeSet<NodeId>,
    },
}
