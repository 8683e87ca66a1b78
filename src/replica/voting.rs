use crate::api::ReplicatorEventKind;
use crate::commitlog::{Index, Log};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::peers::NodeId;
use crate::replica::replica::{next_message_id, Replica};
use crate::replica::replica_api::ReceiptError;
use crate::replica::write_ahead_log::WriteAheadLogEntry;
use crate::rpc::{RequestVote, RequestVoteReply, RpcMessage};
use std::cmp;

impl<L, S> Replica<L, S>
where
    L: Log<WriteAheadLogEntry>,
    S: PersistentLocalState,
{
    pub(super) fn handle_request_vote(&mut self, request: &RequestVote) -> RequestVoteReply {
        let (current_term, mut opt_voted_for) = self.local_state.voted_for_current_term();
        let not_granted = |term| RequestVoteReply {
            term,
            vote_granted: false,
        };

        // Removed nodes keep timing out and campaigning. Don't let them bump our term.
        if !self.is_voter() || !self.quorum.current().contains(request.candidate_id) {
            slog::info!(
                self.logger,
                "Not granting vote. Either candidate {:?} or I am not in the quorum.",
                request.candidate_id
            );
            return not_granted(current_term);
        }

        // 1. Reply false if term < currentTerm (§5.1)
        if request.term < current_term {
            slog::info!(self.logger, "Not granting vote. Candidate term is out of date.");
            return not_granted(current_term);
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        if self.observe_term(request.term, None) {
            slog::info!(
                self.logger,
                "Observed increased term in RequestVote call. Election state: {:?}",
                self.election_state
            );
            // If we've increased the term, it means we haven't voted for anyone this term.
            opt_voted_for = None;
        }
        let term = self.local_state.current_term();

        // 2. If votedFor is null or candidateId, and candidate’s log is at
        // least as up-to-date as receiver’s log, grant vote (§5.2, §5.4).
        if let Some(voted_for) = opt_voted_for {
            if voted_for != request.candidate_id {
                slog::info!(self.logger, "Not granting vote. We already voted for {:?}.", voted_for);
                return not_granted(term);
            }
        }

        if !self.is_candidate_log_gte_mine(request.last_log_entry) {
            slog::info!(self.logger, "Not granting vote. Candidate log is out of date.");
            return not_granted(term);
        }

        let granted = self
            .local_state
            .store_vote_for_term_if_unvoted(request.term, request.candidate_id)
            || self.local_state.voted_for_current_term() == (request.term, Some(request.candidate_id));
        if granted {
            slog::info!(self.logger, "Voting for {:?} in term {:?}.", request.candidate_id, term);
            // Granting a vote counts as hearing from a (future) leader.
            self.election_state.reset_timeout_if_follower();
        }

        RequestVoteReply {
            term,
            vote_granted: granted,
        }
    }

    fn is_candidate_log_gte_mine(&self, candidate_last_entry: Option<(Term, Index)>) -> bool {
        // > Raft determines which of two logs is more up-to-date
        // > by comparing the index and term of the last entries in the
        // > logs. If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        match (self.wal.latest_entry(), candidate_last_entry) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some((my_term, my_index)), Some((candidate_term, candidate_index))) => {
                match candidate_term.cmp(&my_term) {
                    cmp::Ordering::Greater => true,
                    cmp::Ordering::Less => false,
                    cmp::Ordering::Equal => candidate_index >= my_index,
                }
            }
        }
    }

    pub(super) fn handle_request_vote_reply(&mut self, peer_id: NodeId, reply: &RequestVoteReply) {
        if self.observe_term(reply.term, None) {
            slog::info!(self.logger, "Peer {:?} is on a newer term {:?}.", peer_id, reply.term);
            return;
        }

        let current_term = self.local_state.current_term();
        if current_term != reply.term {
            slog::info!(
                self.logger,
                "Received vote for outdated term {:?}, current term: {:?}.",
                reply.term,
                current_term,
            );
            return;
        }
        if !reply.vote_granted {
            slog::info!(self.logger, "Vote not granted from {:?} for term {:?}", peer_id, reply.term);
            return;
        }

        let won = match self.election_state.add_vote_if_candidate(peer_id) {
            Some(votes) => {
                slog::info!(self.logger, "Received votes {:?} for term {:?}", votes, reply.term);
                self.quorum.current().is_committed(votes)
            }
            None => {
                slog::info!(
                    self.logger,
                    "Received vote for term {:?} after transitioning to election state: {:?}",
                    reply.term,
                    self.election_state,
                );
                false
            }
        };

        if won {
            self.become_leader(current_term);
        }
    }

    pub(crate) fn handle_follower_timeout(&mut self) {
        if self.election_state.is_leader() {
            slog::warn!(self.logger, "Follower timeout while leader. Ignoring.");
            return;
        }
        if !self.is_voter() {
            slog::info!(self.logger, "Not in the quorum, won't campaign.");
            self.election_state.arm_follower_timer(false);
            return;
        }

        let timed_out_term = self.local_state.current_term();
        self.event_publisher.publish(ReplicatorEventKind::ElectionTimeout { term: timed_out_term });

        // Write-ahead log style: Vote for self on local state before transitioning to candidate.
        let new_term = self.local_state.increment_term_and_vote_for_self();
        self.election_state.transition_to_candidate_and_vote_for_self();
        slog::info!(
            self.logger,
            "Timed out as follower. Changed to candidate for term {:?}. Election state: {:?}",
            new_term,
            self.election_state,
        );

        let me = self.me();
        let won = match self.election_state.add_vote_if_candidate(me) {
            Some(votes) => self.quorum.current().is_committed(votes),
            None => false,
        };
        if won {
            self.become_leader(new_term);
            return;
        }

        let request = RpcMessage::RequestVote(RequestVote {
            term: new_term,
            candidate_id: self.me(),
            last_log_entry: self.wal.latest_entry(),
        });
        for peer_id in self.quorum.current().all_peers() {
            if peer_id != me {
                self.send_to(peer_id, next_message_id(), request.clone());
            }
        }
    }

    pub(super) fn become_leader(&mut self, term: Term) {
        self.election_state
            .transition_to_leader(term, &self.quorum.current().all_peers(), self.wal.latest_index());
        slog::info!(self.logger, "Elected leader for term {:?}", term);
        self.event_publisher.publish(ReplicatorEventKind::LeaderElected {
            new_leader: self.me(),
            term,
        });

        // A previous leader may have left a quorum change half way.
        if self.quorum.current().is_transitional() {
            let transitional_committed = match (self.quorum.current_index(), self.wal.commit_index()) {
                (Some(index), Some(commit_index)) => index <= commit_index,
                _ => false,
            };
            if transitional_committed {
                self.append_final_configuration();
            } else {
                // It can only commit through an entry of our term. Carry it forward.
                let configuration = self.quorum.current().clone();
                slog::info!(self.logger, "Re-proposing transitional configuration {:?}", configuration);
                if let Err(e) = self.append_as_leader(WriteAheadLogEntry::configuration(term, configuration)) {
                    self.storage_failure("re-proposing transitional configuration", e);
                }
            }
        }

        self.after_leader_append();
    }

    /// Adopts `term` if it's newer than ours, stepping down to follower. Returns true if it was.
    pub(super) fn observe_term(&mut self, term: Term, leader: Option<NodeId>) -> bool {
        if !self.local_state.store_term_if_increased(term) {
            return false;
        }
        self.become_follower(leader);
        true
    }

    pub(super) fn become_follower(&mut self, leader: Option<NodeId>) {
        let lost_term = self.election_state.leader_term();
        self.election_state.transition_to_follower(leader, self.is_voter());

        if let Some(term) = lost_term {
            slog::info!(self.logger, "Lost leadership of term {:?}", term);
            self.event_publisher.publish(ReplicatorEventKind::LeadershipLost { term });
            self.abandon_pending_change();
        }
    }

    fn abandon_pending_change(&mut self) {
        let pending_change = match self.pending_change.take() {
            Some(pending_change) => pending_change,
            None => return,
        };

        let transitional_committed = matches!(self.wal.commit_index(), Some(ci) if pending_change.transitional_index <= ci);
        if transitional_committed {
            pending_change.completion.send(Err(ReceiptError::LeadershipLost));
        } else {
            slog::warn!(self.logger, "Quorum change to {:?} failed.", pending_change.transitional);
            self.event_publisher
                .publish(ReplicatorEventKind::QuorumConfigurationChangeFailed {
                    configuration: pending_change.transitional,
                });
            pending_change.completion.send(Err(ReceiptError::Abandoned));
        }
    }
}
