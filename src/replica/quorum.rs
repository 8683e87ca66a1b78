use crate::commitlog::Index;
use crate::replica::peers::NodeId;
use std::collections::{BTreeSet, HashSet};
use std::iter::FromIterator;

/// Membership of a quorum. While transitional (joint consensus), both `peers` and `prior_peers`
/// must independently agree for anything to be decided.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct QuorumConfiguration {
    peers: BTreeSet<NodeId>,
    prior_peers: BTreeSet<NodeId>,
    transitional: bool,
}

impl QuorumConfiguration {
    pub fn new(peers: impl IntoIterator<Item = NodeId>) -> Self {
        QuorumConfiguration {
            peers: BTreeSet::from_iter(peers),
            prior_peers: BTreeSet::new(),
            transitional: false,
        }
    }

    pub(crate) fn transitional(peers: BTreeSet<NodeId>, prior_peers: BTreeSet<NodeId>) -> Self {
        QuorumConfiguration {
            peers,
            prior_peers,
            transitional: true,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn peers(&self) -> &BTreeSet<NodeId> {
        &self.peers
    }

    pub fn prior_peers(&self) -> &BTreeSet<NodeId> {
        &self.prior_peers
    }

    pub fn is_transitional(&self) -> bool {
        self.transitional
    }

    /// Every node that takes part in decisions under this configuration.
    pub fn all_peers(&self) -> BTreeSet<NodeId> {
        self.peers.union(&self.prior_peers).copied().collect()
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.peers.contains(&node_id) || self.prior_peers.contains(&node_id)
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty() && self.prior_peers.is_empty()
    }

    /// The joint configuration moving from our peers to `new_peers`. None if nothing would change.
    pub fn transition_to(&self, new_peers: impl IntoIterator<Item = NodeId>) -> Option<Self> {
        let new_peers = BTreeSet::from_iter(new_peers);
        if new_peers == self.peers {
            return None;
        }

        Some(Self::transitional(new_peers, self.peers.clone()))
    }

    /// The configuration consisting solely of the target peers.
    pub fn complete_transition(&self) -> Self {
        Self::new(self.peers.iter().copied())
    }

    /// True iff `acks` holds a strict majority of `peers`, and, while transitional, also a strict
    /// majority of `prior_peers`.
    pub fn is_committed(&self, acks: &HashSet<NodeId>) -> bool {
        let has_majority = |set: &BTreeSet<NodeId>| {
            let acked = set.iter().filter(|peer| acks.contains(peer)).count();
            acked > set.len() / 2
        };

        has_majority(&self.peers) && (!self.transitional || has_majority(&self.prior_peers))
    }

    /// Highest index that a majority (of both sets, if transitional) has matched.
    pub fn committed_index<F>(&self, matched: F) -> Option<Index>
    where
        F: Fn(NodeId) -> Option<Index>,
    {
        let peers_index = majority_matched_index(&self.peers, &matched)?;
        if !self.transitional {
            return Some(peers_index);
        }

        let prior_index = majority_matched_index(&self.prior_peers, &matched)?;
        Some(peers_index.min(prior_index))
    }
}

fn majority_matched_index<F>(set: &BTreeSet<NodeId>, matched: &F) -> Option<Index>
where
    F: Fn(NodeId) -> Option<Index>,
{
    if set.is_empty() {
        return None;
    }

    let mut matched_indexes: Vec<u64> = set
        .iter()
        .map(|peer| matched(*peer).map(|index| index.as_u64()).unwrap_or(0))
        .collect();
    matched_indexes.sort_unstable_by(|a, b| b.cmp(a));

    // `len/2 + 1` members hold at least the value at position `len/2` in descending order.
    Index::from_u64_opt(matched_indexes[set.len() / 2])
}

/// Tracks which configuration is in effect. Configurations take effect as soon as they're
/// appended to the local log, and are reverted when the log is truncated.
pub(crate) struct QuorumTracker {
    bootstrap: QuorumConfiguration,
    // Ascending by index.
    history: Vec<(Index, QuorumConfiguration)>,
}

impl QuorumTracker {
    pub(crate) fn new(bootstrap: QuorumConfiguration) -> Self {
        QuorumTracker {
            bootstrap,
            history: Vec::new(),
        }
    }

    pub(crate) fn current(&self) -> &QuorumConfiguration {
        self.history
            .last()
            .map(|(_, configuration)| configuration)
            .unwrap_or(&self.bootstrap)
    }

    /// Log index of the current configuration. None for the bootstrap configuration.
    pub(crate) fn current_index(&self) -> Option<Index> {
        self.history.last().map(|(index, _)| *index)
    }

    pub(crate) fn record(&mut self, index: Index, configuration: QuorumConfiguration) {
        if let Some((last_index, _)) = self.history.last() {
            assert!(
                index > *last_index,
                "Configurations must be recorded in log order. {:?} <= {:?}",
                index,
                last_index
            );
        }
        self.history.push((index, configuration));
    }

    /// Forget configurations at `index` and later.
    pub(crate) fn truncate(&mut self, index: Index) {
        self.history.retain(|(recorded, _)| *recorded < index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(ids: &[u64]) -> Vec<NodeId> {
        ids.iter().map(|id| NodeId(*id)).collect()
    }

    fn acks(ids: &[u64]) -> HashSet<NodeId> {
        HashSet::from_iter(self::ids(ids))
    }

    #[test]
    fn plain_majority() {
        let config = QuorumConfiguration::new(ids(&[1, 2, 3]));

        assert!(!config.is_committed(&acks(&[])));
        assert!(!config.is_committed(&acks(&[1])));
        assert!(config.is_committed(&acks(&[1, 3])));
        assert!(config.is_committed(&acks(&[1, 2, 3])));
        // Outsiders don't count.
        assert!(!config.is_committed(&acks(&[1, 4, 5])));

        let four = QuorumConfiguration::new(ids(&[1, 2, 3, 4]));
        assert!(!four.is_committed(&acks(&[1, 2])));
        assert!(four.is_committed(&acks(&[1, 2, 4])));

        assert!(!QuorumConfiguration::empty().is_committed(&acks(&[1])));
    }

    #[test]
    fn joint_majority_needs_both_sets() {
        let config = QuorumConfiguration::new(ids(&[1, 2, 3]))
            .transition_to(ids(&[3, 4, 5]))
            .unwrap();
        assert!(config.is_transitional());
        assert_eq!(config.prior_peers(), &BTreeSet::from_iter(ids(&[1, 2, 3])));
        assert_eq!(config.all_peers(), BTreeSet::from_iter(ids(&[1, 2, 3, 4, 5])));

        // Majority of new peers alone is insufficient.
        assert!(!config.is_committed(&acks(&[3, 4, 5])));
        // Majority of prior peers alone is insufficient.
        assert!(!config.is_committed(&acks(&[1, 2, 3])));
        assert!(config.is_committed(&acks(&[2, 3, 4])));
        assert!(config.is_committed(&acks(&[1, 2, 4, 5])));

        let completed = config.complete_transition();
        assert!(!completed.is_transitional());
        assert!(completed.prior_peers().is_empty());
        assert!(completed.is_committed(&acks(&[4, 5])));
    }

    #[test]
    fn transition_to_same_peers_is_noop() {
        let config = QuorumConfiguration::new(ids(&[1, 2, 3]));

        assert_eq!(config.transition_to(ids(&[3, 2, 1])), None);
        assert!(config.transition_to(ids(&[1, 2, 3, 4])).is_some());
    }

    #[test]
    fn test_commit_index_logic() {
        fn run(expected: u64, matches: Vec<u64>) {
            let matched: Vec<(NodeId, u64)> = matches
                .iter()
                .enumerate()
                .map(|(i, m)| (NodeId(i as u64 + 1), *m))
                .collect();
            let config = QuorumConfiguration::new(matched.iter().map(|(id, _)| *id));

            let actual = config.committed_index(|peer| {
                matched
                    .iter()
                    .find(|(id, _)| *id == peer)
                    .and_then(|(_, m)| Index::from_u64_opt(*m))
            });

            assert_eq!(Index::from_u64_opt(expected), actual, "matches: {:?}", matches);
        }

        // First entry is the leader, which always holds the longest log.

        // 1-cluster
        run(9, vec![9]);

        // 3-cluster
        run(0, vec![9, 0, 0]);
        run(9, vec![9, 0, 9]);
        run(9, vec![9, 8, 9]);

        // 4-cluster
        run(0, vec![9, 0, 0, 0]);
        run(0, vec![9, 0, 0, 9]);
        run(8, vec![9, 0, 8, 9]);
        run(8, vec![9, 7, 8, 9]);

        // 5-cluster
        run(0, vec![9, 0, 0, 0, 0]);
        run(0, vec![9, 0, 0, 0, 9]);
        run(8, vec![9, 0, 0, 8, 9]);
        run(8, vec![9, 0, 7, 8, 9]);
        run(8, vec![9, 6, 7, 8, 9]);

        // 6-cluster
        run(0, vec![9, 0, 0, 0, 8, 9]);
        run(7, vec![9, 0, 0, 7, 8, 9]);
        run(7, vec![9, 5, 6, 7, 8, 9]);

        // 7-cluster
        run(0, vec![9, 0, 0, 0, 0, 8, 9]);
        run(7, vec![9, 0, 0, 0, 7, 8, 9]);
        run(7, vec![9, 4, 5, 6, 7, 8, 9]);

        // Ordering doesn't matter
        run(9, vec![9, 9, 8]);
        run(8, vec![9, 7, 9, 8]);
        run(7, vec![9, 9, 8, 0, 0, 7]);
    }

    #[test]
    fn joint_commit_index_is_min_of_both_sets() {
        let config = QuorumConfiguration::new(ids(&[1, 2, 3]))
            .transition_to(ids(&[1, 4, 5]))
            .unwrap();
        let matched = |peer: NodeId| match peer.0 {
            1 => Index::from_u64_opt(9),
            2 => Index::from_u64_opt(9),
            3 => Index::from_u64_opt(9),
            4 => Index::from_u64_opt(5),
            _ => None,
        };

        // Prior set agrees on 9, new set only on 5.
        assert_eq!(config.committed_index(matched), Some(Index::new(5)));
        assert_eq!(QuorumConfiguration::empty().committed_index(matched), None);
    }

    #[test]
    fn tracker_follows_appends_and_truncation() {
        let bootstrap = QuorumConfiguration::new(ids(&[1, 2, 3]));
        let joint = bootstrap.transition_to(ids(&[1, 2, 3, 4])).unwrap();
        let fin = joint.complete_transition();

        let mut tracker = QuorumTracker::new(bootstrap.clone());
        assert_eq!(tracker.current(), &bootstrap);
        assert_eq!(tracker.current_index(), None);

        tracker.record(Index::new(3), joint.clone());
        tracker.record(Index::new(5), fin.clone());
        assert_eq!(tracker.current(), &fin);
        assert_eq!(tracker.current_index(), Some(Index::new(5)));

        tracker.truncate(Index::new(4));
        assert_eq!(tracker.current(), &joint);

        tracker.truncate(Index::new(3));
        assert_eq!(tracker.current(), &bootstrap);
    }
}
