//! Bounded retention of the slowest nodes

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use super::node::Node;

#[derive(Debug, Clone)]
struct Entry {
    node: Node,
    /// Insertion order, used to break duration ties
    seq: u64,
}

impl Entry {
    fn duration(&self) -> Duration {
        self.node.duration()
    }
}

// The heap top is the next node to evict: shortest duration first, and among
// equal durations the most recently inserted.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .duration()
            .cmp(&self.duration())
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

/// Result of offering a node to the store
#[derive(Debug)]
pub enum Retention {
    /// Stored without displacing anything
    Added,
    /// Stored in place of the returned node
    Replaced(Node),
    /// Not stored; the store is full of nodes at least as slow
    Rejected(Node),
}

/// Keeps at most `max_nodes` nodes, preferring the longest ones.
///
/// Insertion is O(log max_nodes): when full, the shortest retained node sits
/// at the top of the heap and is overwritten in place.
#[derive(Debug, Clone)]
pub struct NodeStore {
    heap: BinaryHeap<Entry>,
    /// 0 means unbounded
    max_nodes: usize,
    inserted: u64,
}

impl NodeStore {
    pub fn new(max_nodes: usize) -> Self {
        Self {
            heap: BinaryHeap::new(),
            max_nodes,
            inserted: 0,
        }
    }

    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    fn is_full(&self) -> bool {
        self.max_nodes > 0 && self.heap.len() >= self.max_nodes
    }

    /// Shortest retained duration, i.e. the next eviction candidate
    pub fn min_duration(&self) -> Option<Duration> {
        self.heap.peek().map(Entry::duration)
    }

    /// Whether a node of this duration would be kept if offered now
    pub fn would_accept(&self, duration: Duration) -> bool {
        if !self.is_full() {
            return true;
        }
        self.min_duration().map_or(true, |min| duration > min)
    }

    pub fn insert(&mut self, node: Node) -> Retention {
        let entry = Entry {
            node,
            seq: self.inserted,
        };
        self.inserted += 1;

        if !self.is_full() {
            self.heap.push(entry);
            return Retention::Added;
        }

        match self.heap.peek_mut() {
            Some(mut top) if entry.duration() > top.duration() => {
                let evicted = std::mem::replace(&mut *top, entry);
                Retention::Replaced(evicted.node)
            }
            _ => Retention::Rejected(entry.node),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Retained nodes in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.heap.iter().map(|entry| &entry.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn node(stamp: u32, secs: u64) -> Node {
        Node {
            stamp,
            start: Duration::ZERO,
            end: Duration::from_secs(secs),
            name: format!("Custom/{}", secs),
            params: None,
        }
    }

    fn retained_secs(store: &NodeStore) -> BTreeSet<u64> {
        store.iter().map(|n| n.duration().as_secs()).collect()
    }

    #[test]
    fn test_unbounded() {
        let mut store = NodeStore::new(0);
        for i in 0..1000 {
            assert!(matches!(store.insert(node(i, 1)), Retention::Added));
        }
        assert_eq!(store.len(), 1000);
    }

    #[test]
    fn test_slowest_kept() {
        let mut store = NodeStore::new(5);
        for (i, d) in [5, 4, 6, 3, 7, 2, 8, 1, 9].into_iter().enumerate() {
            store.insert(node(i as u32 + 1, d));
        }
        assert_eq!(retained_secs(&store), BTreeSet::from([5, 6, 7, 8, 9]));
        assert_eq!(store.min_duration(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_equal_to_minimum_rejected() {
        let mut store = NodeStore::new(2);
        store.insert(node(1, 3));
        store.insert(node(2, 4));

        assert!(!store.would_accept(Duration::from_secs(3)));
        match store.insert(node(3, 3)) {
            Retention::Rejected(n) => assert_eq!(n.stamp, 3),
            other => panic!("expected rejection, got {:?}", other),
        }

        assert!(store.would_accept(Duration::from_secs(5)));
        match store.insert(node(4, 5)) {
            Retention::Replaced(n) => assert_eq!(n.stamp, 1),
            other => panic!("expected replacement, got {:?}", other),
        }
    }

    #[test]
    fn test_tie_evicts_later_inserted() {
        let mut store = NodeStore::new(2);
        store.insert(node(1, 3));
        store.insert(node(2, 3));

        match store.insert(node(3, 10)) {
            Retention::Replaced(n) => assert_eq!(n.stamp, 2),
            other => panic!("expected replacement, got {:?}", other),
        }
        let stamps: BTreeSet<u32> = store.iter().map(|n| n.stamp).collect();
        assert_eq!(stamps, BTreeSet::from([1, 3]));
    }

    proptest! {
        #[test]
        fn prop_retains_k_largest(
            durations in prop::collection::hash_set(1u64..10_000, 1..200)
                .prop_map(|set| set.into_iter().collect::<Vec<_>>())
                .prop_shuffle(),
            max_nodes in 1usize..50,
        ) {
            let mut store = NodeStore::new(max_nodes);
            for (i, d) in durations.iter().enumerate() {
                store.insert(node(i as u32 + 1, *d));
            }

            let mut sorted = durations.clone();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            let expected: BTreeSet<u64> = sorted.into_iter().take(max_nodes).collect();

            prop_assert_eq!(store.len(), expected.len());
            prop_assert_eq!(retained_secs(&store), expected);
        }
    }
}
