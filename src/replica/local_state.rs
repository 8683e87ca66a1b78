use crate::replica::peers::NodeId;
use crate::replica::quorum::QuorumConfiguration;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

/// Election term. `Term(0)` is the term before any election happened.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct Term(u64);

impl Term {
    pub fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PersistentLocalState is used whenever the raft protocol requires that something is persisted
/// to a durable store to guarantee safety. Not everything that uses disk has to go through this,
/// only algorithm-correctness-critical ones.
///
/// Store methods should be implemented atomically via a CAS like operation. Similar to most CAS
/// method signatures, the CAS store methods will return true if we have mutated state.
pub trait PersistentLocalState {
    /// Set current term to `new_term` atomically, iff it is larger than current term.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_term_if_increased(&mut self, new_term: Term) -> bool;

    /// Store our vote for the latest term iff the latest term (internal state) is the same term as
    /// the one provided, and we have not stored a vote for the latest term.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_vote_for_term_if_unvoted(&mut self, expected_current_term: Term, vote: NodeId) -> bool;

    /// Return the new term. Used when transitioning to candidate.
    fn increment_term_and_vote_for_self(&mut self) -> Term;

    fn current_term(&self) -> Term;
    fn voted_for_current_term(&self) -> (Term, Option<NodeId>);

    /// The configuration a quorum was first created with. Stored once, never modified.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_bootstrap_configuration_if_absent(&mut self, configuration: QuorumConfiguration) -> bool;
    fn bootstrap_configuration(&self) -> Option<QuorumConfiguration>;
}

/// Creates (or reopens) the local state of one replicator.
pub trait LocalStateFactory<S: PersistentLocalState> {
    fn try_create_local_state(&self, quorum_id: &str, me: NodeId) -> Result<S, io::Error>;
}

// Currently, this is not persistent. It's just in memory. But I'm focusing on raft algorithm more
// so than integrating with disk correctly. Clones share state, so a replicator re-created on the
// same node sees what the previous one stored.
#[derive(Clone)]
pub struct VolatileLocalState {
    inner: Arc<Mutex<VolatileLocalStateInner>>,
    my_node_id: NodeId,
}

struct VolatileLocalStateInner {
    current_term: Term,
    voted_for_this_term: Option<NodeId>,
    bootstrap_configuration: Option<QuorumConfiguration>,
}

impl VolatileLocalState {
    pub fn new(my_node_id: NodeId) -> Self {
        VolatileLocalState {
            inner: Arc::new(Mutex::new(VolatileLocalStateInner {
                current_term: Term::new(0),
                voted_for_this_term: None,
                bootstrap_configuration: None,
            })),
            my_node_id,
        }
    }

    fn state(&self) -> MutexGuard<'_, VolatileLocalStateInner> {
        self.inner.lock().expect("VolatileLocalState mutex guard poison")
    }
}

// LOL @ that impl signature.
impl PersistentLocalState for VolatileLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> bool {
        let mut state = self.state();
        if new_term <= state.current_term {
            false
        } else {
            state.current_term = new_term;
            state.voted_for_this_term = None;
            true
        }
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: NodeId) -> bool {
        let mut state = self.state();
        if expected_term == state.current_term && state.voted_for_this_term.is_none() {
            state.voted_for_this_term.replace(vote);
            true
        } else {
            false
        }
    }

    fn increment_term_and_vote_for_self(&mut self) -> Term {
        let my_node_id = self.my_node_id;
        let mut state = self.state();
        state.current_term.incr();
        state.voted_for_this_term.replace(my_node_id);

        state.current_term
    }

    fn current_term(&self) -> Term {
        self.state().current_term
    }

    fn voted_for_current_term(&self) -> (Term, Option<NodeId>) {
        let state = self.state();
        (state.current_term, state.voted_for_this_term)
    }

    fn store_bootstrap_configuration_if_absent(&mut self, configuration: QuorumConfiguration) -> bool {
        let mut state = self.state();
        if state.bootstrap_configuration.is_some() {
            return false;
        }
        state.bootstrap_configuration.replace(configuration);
        true
    }

    fn bootstrap_configuration(&self) -> Option<QuorumConfiguration> {
        self.state().bootstrap_configuration.clone()
    }
}

/// Hands out one `VolatileLocalState` per quorum id, reused across re-creation.
#[derive(Clone, Default)]
pub struct InMemoryLocalStateFactory {
    states: Arc<Mutex<HashMap<String, VolatileLocalState>>>,
}

impl InMemoryLocalStateFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStateFactory<VolatileLocalState> for InMemoryLocalStateFactory {
    fn try_create_local_state(&self, quorum_id: &str, me: NodeId) -> Result<VolatileLocalState, io::Error> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "local state registry poisoned"))?;

        let state = states
            .entry(quorum_id.to_string())
            .or_insert_with(|| VolatileLocalState::new(me));
        Ok(state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vote_once_per_term() {
        let mut state = VolatileLocalState::new(NodeId(1));

        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), NodeId(2)));
        assert!(state.store_term_if_increased(Term::new(1)));
        assert!(!state.store_term_if_increased(Term::new(1)));
        assert!(state.store_vote_for_term_if_unvoted(Term::new(1), NodeId(2)));
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), NodeId(3)));
        assert_eq!(state.voted_for_current_term(), (Term::new(1), Some(NodeId(2))));

        // A new term clears the vote.
        assert!(state.store_term_if_increased(Term::new(3)));
        assert_eq!(state.voted_for_current_term(), (Term::new(3), None));

        assert_eq!(state.increment_term_and_vote_for_self(), Term::new(4));
        assert_eq!(state.voted_for_current_term(), (Term::new(4), Some(NodeId(1))));
    }

    #[test]
    fn factory_reopens_same_state() {
        let factory = InMemoryLocalStateFactory::new();
        let mut first = factory.try_create_local_state("q", NodeId(1)).unwrap();
        first.store_term_if_increased(Term::new(7));
        assert!(first.store_bootstrap_configuration_if_absent(QuorumConfiguration::new(vec![NodeId(1)])));

        let reopened = factory.try_create_local_state("q", NodeId(1)).unwrap();
        assert_eq!(reopened.current_term(), Term::new(7));
        assert_eq!(
            reopened.bootstrap_configuration(),
            Some(QuorumConfiguration::new(vec![NodeId(1)]))
        );

        let other = factory.try_create_local_state("other", NodeId(1)).unwrap();
        assert_eq!(other.current_term(), Term::new(0));
    }
}
