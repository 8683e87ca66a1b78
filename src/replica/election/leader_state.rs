use crate::commitlog::Index;
use crate::replica::election::timers::LeaderTimerHandle;
use crate::replica::NodeId;
use std::collections::{BTreeSet, HashMap};
use tokio::time::{Duration, Instant};

pub(crate) struct LeaderStateTracker {
    peer_state: HashMap<NodeId, PeerState>,
}

impl LeaderStateTracker {
    pub(super) fn new(peer_state: HashMap<NodeId, PeerState>) -> Self {
        LeaderStateTracker { peer_state }
    }

    pub(crate) fn peer_state_mut(&mut self, peer_id: &NodeId) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer_id)
    }

    pub(crate) fn peer_ids(&self) -> BTreeSet<NodeId> {
        self.peer_state.keys().copied().collect()
    }

    pub(crate) fn matched(&self, peer_id: &NodeId) -> Option<Index> {
        self.peer_state.get(peer_id).and_then(PeerState::matched)
    }

    pub(super) fn contains(&self, peer_id: &NodeId) -> bool {
        self.peer_state.contains_key(peer_id)
    }

    pub(super) fn insert(&mut self, peer_id: NodeId, peer_state: PeerState) {
        self.peer_state.insert(peer_id, peer_state);
    }

    /// Stops tracking (and heartbeating) peers that aren't in `keep`.
    pub(super) fn retain(&mut self, keep: &BTreeSet<NodeId>) {
        self.peer_state.retain(|peer_id, _| keep.contains(peer_id));
    }
}

pub(crate) struct PeerState {
    // Ticks for heartbeats and overdue replies to this peer
    leader_timer_handler: LeaderTimerHandle,

    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    // After initial reconciliation of follower logs, this will converge
    // to always be `next - 1`.
    matched: Option<Index>,

    // Simplicity vs throughput tradeoff. We allow 1 outstanding request per peer; no pipelining.
    // Entries are still batched, so this should not limit throughput too badly.
    in_flight: Option<InFlightAppendEntries>,
}

/// What we sent in the outstanding AppendEntries, so its reply can be interpreted.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InFlightAppendEntries {
    pub(crate) message_id: u64,
    pub(crate) sent_at: Instant,
    pub(crate) previous_log_entry: Option<Index>,
    pub(crate) num_entries: usize,
}

impl PeerState {
    pub(super) fn new(leader_timer_handler: LeaderTimerHandle, latest_log_entry_index: Option<Index>) -> Self {
        PeerState {
            leader_timer_handler,
            next: latest_log_entry_index
                .map(|i| i.plus(1))
                .unwrap_or_else(Index::start_index),
            matched: None,
            in_flight: None,
        }
    }

    pub(crate) fn next_and_previous_log_index(&self) -> (Index, Option<Index>) {
        (self.next, self.next.checked_minus(1))
    }

    pub(crate) fn matched(&self) -> Option<Index> {
        self.matched
    }

    /// True if a request is outstanding and younger than `timeout`. Expired requests are
    /// forgotten, and a late reply to them is dropped.
    pub(crate) fn has_outstanding_request(&mut self, now: Instant, timeout: Duration) -> bool {
        match &self.in_flight {
            Some(in_flight) if now.saturating_duration_since(in_flight.sent_at) < timeout => true,
            Some(_) => {
                self.in_flight = None;
                false
            }
            None => false,
        }
    }

    /// The peer's timer ticks again once `reply_timeout` passes, so a lost request is retried.
    pub(crate) fn start_request(&mut self, in_flight: InFlightAppendEntries, reply_timeout: Duration) {
        self.in_flight.replace(in_flight);
        self.leader_timer_handler.expect_reply_within(reply_timeout);
    }

    /// Returns the outstanding request iff `message_id` identifies it. Heartbeats resume from
    /// the reply.
    pub(crate) fn finish_request(&mut self, message_id: u64) -> Option<InFlightAppendEntries> {
        match &self.in_flight {
            Some(in_flight) if in_flight.message_id == message_id => {
                self.leader_timer_handler.reset_heartbeat_timer();
                self.in_flight.take()
            }
            _ => None,
        }
    }

    /// Peer's log matches ours up to and including `previous_log_entry + num_entries_replicated`.
    pub(crate) fn update_log(&mut self, previous_log_entry: Option<Index>, num_entries_replicated: usize) {
        let new_matched = match (previous_log_entry, num_entries_replicated) {
            (None, 0) => return,
            (None, n) => Index::new_usize(n),
            (Some(prev), n) => prev.plus(n as u64),
        };

        if self.matched.map_or(true, |matched| new_matched > matched) {
            self.matched.replace(new_matched);
        }
        let new_next = new_matched.plus(1);
        if new_next > self.next {
            self.next = new_next;
        }
    }

    /// Peer rejected our previous entry. Steps back by at least one, further if the peer's hint
    /// says its log ends earlier.
    pub(crate) fn rewind_log(&mut self, logger: &slog::Logger, peer_next_index_hint: Option<Index>) {
        let stepped_back = match self.next.checked_minus(1) {
            Some(stepped_back) => stepped_back,
            None => {
                slog::warn!(logger, "Can't rewind peer log, already at beginning of log.");
                return;
            }
        };
        let mut new_next = match peer_next_index_hint {
            Some(hint) if hint < stepped_back => hint,
            _ => stepped_back,
        };

        // Don't panic here, because peer could return garbage data.
        if let Some(matched) = self.matched {
            if new_next <= matched {
                slog::warn!(
                    logger,
                    "Peer rejected entries at or before its matched index {:?}. Keeping next after matched.",
                    matched
                );
                new_next = matched.plus(1);
            }
        }

        self.next = new_next;
    }
}
