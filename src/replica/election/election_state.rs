use crate::actor::WeakActorClient;
use crate::api::{Broadcaster, ReplicatorState};
use crate::commitlog::Index;
use crate::replica::election::timers::{FollowerTimerHandle, LeaderTimerHandle};
use crate::replica::election::{LeaderStateTracker, PeerState};
use crate::replica::{NodeId, Term};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub my_node_id: NodeId,
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
}

/// ElectionState is responsible for holding state specific to the stage in an election. Its
/// methods are responsible for "what" to do. It is NOT responsible for validating anything
/// specific to logs, terms, peers, etc. or knowing "when" to do something.
pub(crate) struct ElectionState {
    state: State,
    config: ElectionConfig,
    actor_client: WeakActorClient,
    state_broadcaster: Broadcaster<ReplicatorState>,
}

impl ElectionState {
    /// `new_follower()` creates a new ElectionState instance that starts out as a follower. Its
    /// election timer stays disarmed until `arm_follower_timer()`.
    pub(crate) fn new_follower(
        config: ElectionConfig,
        actor_client: WeakActorClient,
        state_broadcaster: Broadcaster<ReplicatorState>,
    ) -> Self {
        Self {
            state: State::Follower(FollowerState {
                leader: None,
                follower_timeout_tracker: None,
            }),
            config,
            actor_client,
            state_broadcaster,
        }
    }

    /// `voting` decides whether we'll ever time out and campaign as this follower.
    pub(crate) fn transition_to_follower(&mut self, new_leader: Option<NodeId>, voting: bool) {
        let previous_role = self.role();
        self.state = State::Follower(FollowerState {
            leader: new_leader,
            follower_timeout_tracker: if voting { Some(self.spawn_follower_timer()) } else { None },
        });
        self.notify_if_role_changed(previous_role);
    }

    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self) {
        let previous_role = self.role();
        let mut cs = CandidateState {
            received_votes_from: HashSet::with_capacity(3),
            _follower_timeout_tracker: self.spawn_follower_timer(),
        };

        // Vote for self
        cs.received_votes_from.insert(self.config.my_node_id);

        self.state = State::Candidate(cs);
        self.notify_if_role_changed(previous_role);
    }

    pub(crate) fn transition_to_leader(
        &mut self,
        term: Term,
        peer_ids: &BTreeSet<NodeId>,
        latest_log_entry_index: Option<Index>,
    ) {
        let previous_role = self.role();
        let mut leader_state = LeaderState {
            term,
            tracker: LeaderStateTracker::new(HashMap::with_capacity(peer_ids.len())),
        };
        sync_peers(&self.config, &self.actor_client, &mut leader_state, peer_ids, latest_log_entry_index);

        self.state = State::Leader(leader_state);
        self.notify_if_role_changed(previous_role);
    }

    /// Leader only: start replicating to new peers, stop replicating to removed ones. We never
    /// track ourselves.
    pub(crate) fn sync_leader_peers(&mut self, peer_ids: &BTreeSet<NodeId>, latest_log_entry_index: Option<Index>) {
        if let State::Leader(leader_state) = &mut self.state {
            sync_peers(&self.config, &self.actor_client, leader_state, peer_ids, latest_log_entry_index);
        }
    }

    /// Follower only: spawn or drop the election timer.
    pub(crate) fn arm_follower_timer(&mut self, voting: bool) {
        let actor_client = self.actor_client.clone();
        let (min, max) = (self.config.follower_min_timeout, self.config.follower_max_timeout);
        if let State::Follower(fs) = &mut self.state {
            match (voting, fs.follower_timeout_tracker.is_some()) {
                (true, false) => {
                    fs.follower_timeout_tracker
                        .replace(FollowerTimerHandle::spawn_timer_task(min, max, actor_client));
                }
                (false, true) => {
                    fs.follower_timeout_tracker = None;
                }
                _ => {}
            }
        }
    }

    fn spawn_follower_timer(&self) -> FollowerTimerHandle {
        FollowerTimerHandle::spawn_timer_task(
            self.config.follower_min_timeout,
            self.config.follower_max_timeout,
            self.actor_client.clone(),
        )
    }

    pub(crate) fn role(&self) -> ReplicatorState {
        match &self.state {
            State::Leader(_) => ReplicatorState::Leader,
            State::Candidate(_) => ReplicatorState::Candidate,
            State::Follower(_) => ReplicatorState::Follower,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self.state, State::Leader(_))
    }

    pub(crate) fn leader_term(&self) -> Option<Term> {
        match &self.state {
            State::Leader(ls) => Some(ls.term),
            _ => None,
        }
    }

    fn notify_if_role_changed(&self, previous_role: ReplicatorState) {
        let role = self.role();
        if role != previous_role {
            self.state_broadcaster.publish(role);
        }
    }

    pub(crate) fn reset_timeout_if_follower(&self) {
        if let State::Follower(FollowerState {
            follower_timeout_tracker: Some(timer),
            ..
        }) = &self.state
        {
            timer.reset_timeout();
        }
    }

    /// Returns true if we just learned who the leader is.
    pub(crate) fn set_leader_if_unknown(&mut self, leader: NodeId) -> bool {
        if let State::Follower(fs) = &mut self.state {
            if fs.leader.is_none() {
                fs.leader.replace(leader);
                return true;
            }
        }
        false
    }

    pub(crate) fn current_leader(&self) -> Option<NodeId> {
        match &self.state {
            State::Leader(_) => Some(self.config.my_node_id),
            State::Follower(fs) => fs.leader,
            State::Candidate(_) => None,
        }
    }

    /// Return votes received so far if candidate, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: NodeId) -> Option<&HashSet<NodeId>> {
        if let State::Candidate(cs) = &mut self.state {
            cs.received_votes_from.insert(vote_from);
            Some(&cs.received_votes_from)
        } else {
            None
        }
    }

    pub(crate) fn leader_state(&self) -> Option<&LeaderStateTracker> {
        if let State::Leader(ls) = &self.state {
            Some(&ls.tracker)
        } else {
            None
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        if let State::Leader(ls) = &mut self.state {
            Some(&mut ls.tracker)
        } else {
            None
        }
    }

    /// Drops all timers. Used when the replicator shuts down.
    pub(crate) fn stop(&mut self) {
        self.state = State::Follower(FollowerState {
            leader: None,
            follower_timeout_tracker: None,
        });
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(ls) => write!(f, "Leader(Term={:?})", ls.term),
            State::Candidate(cs) => write!(f, "Candidate(Votes={:?})", cs.received_votes_from),
            State::Follower(FollowerState { leader: Some(leader), .. }) => write!(f, "Follower(Leader={:?})", leader),
            State::Follower(FollowerState { leader: None, .. }) => write!(f, "Follower(Leader=None)"),
        }
    }
}

fn sync_peers(
    config: &ElectionConfig,
    actor_client: &WeakActorClient,
    leader_state: &mut LeaderState,
    peer_ids: &BTreeSet<NodeId>,
    latest_log_entry_index: Option<Index>,
) {
    let peer_ids: BTreeSet<NodeId> = peer_ids
        .iter()
        .copied()
        .filter(|id| *id != config.my_node_id)
        .collect();

    leader_state.tracker.retain(&peer_ids);
    for peer_id in peer_ids {
        if leader_state.tracker.contains(&peer_id) {
            continue;
        }
        let leader_timer_handle = LeaderTimerHandle::spawn_timer_task(
            config.leader_heartbeat_duration,
            actor_client.clone(),
            peer_id,
            leader_state.term,
        );
        leader_state
            .tracker
            .insert(peer_id, PeerState::new(leader_timer_handle, latest_log_entry_index));
    }
}

enum State {
    Leader(LeaderState),
    Candidate(CandidateState),
    Follower(FollowerState),
}

struct LeaderState {
    term: Term,
    tracker: LeaderStateTracker,
}

struct CandidateState {
    received_votes_from: HashSet<NodeId>,
    _follower_timeout_tracker: FollowerTimerHandle,
}

struct FollowerState {
    leader: Option<NodeId>,
    follower_timeout_tracker: Option<FollowerTimerHandle>,
}
