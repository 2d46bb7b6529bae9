//! The retained node set of one transaction and its tree view

use fxhash::FxHashMap;
use serde::ser::{Serialize, SerializeTuple, Serializer};
use std::time::Duration;

use super::node::{Node, NodeParams, SegmentParams};
use super::stack::StackTrace;
use super::store::{NodeStore, Retention};
use crate::config::TraceConfig;

/// Parent stamp of segments started with nothing else open
pub(crate) const ROOT_STAMP: u32 = 0;

/// Deepest nesting level of the encoded tree. Nodes nested further are
/// attached to their ancestor at this level.
pub const MAX_TREE_DEPTH: usize = 50;

/// Timing of a segment that passed stack validation
#[derive(Debug, Clone, Copy)]
pub(crate) struct SegmentEnd {
    pub stamp: u32,
    pub start: Duration,
    pub end: Duration,
}

impl SegmentEnd {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Nodes retained for one transaction, plus the start-time ancestry needed
/// to rebuild the tree.
///
/// The ancestry table holds one `u32` per started segment, retained or not,
/// so it grows with the transaction's segment count even when `max_nodes`
/// bounds the store.
#[derive(Debug, Clone)]
pub struct TxnTrace {
    config: TraceConfig,
    store: NodeStore,
    /// `parents[stamp - 1]` is the stamp open when `stamp` started
    parents: Vec<u32>,
}

impl TxnTrace {
    pub fn new(config: TraceConfig) -> Self {
        let store = NodeStore::new(config.max_nodes);
        Self {
            config,
            store,
            parents: Vec::new(),
        }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Register a started segment, returning its stamp
    pub(crate) fn register_start(&mut self, parent: u32) -> Option<u32> {
        let stamp = u32::try_from(self.parents.len() + 1).ok()?;
        self.parents.push(parent);
        Some(stamp)
    }

    fn parent_of(&self, stamp: u32) -> u32 {
        if stamp == ROOT_STAMP {
            return ROOT_STAMP;
        }
        self.parents
            .get(stamp as usize - 1)
            .copied()
            .unwrap_or(ROOT_STAMP)
    }

    /// Whether a segment of this length could end up in the trace
    pub(crate) fn considers(&self, duration: Duration) -> bool {
        if !self.config.enabled {
            return false;
        }
        if duration < self.config.segment_threshold {
            return false;
        }
        self.store.would_accept(duration)
    }

    /// Whether stack traces and query parameters apply at this length
    pub(crate) fn full_diagnostics(&self, duration: Duration) -> bool {
        duration >= self.config.stack_trace_threshold
    }

    /// Enrich and store a finished segment
    pub(crate) fn witness_node(&mut self, end: SegmentEnd, name: String, segment: SegmentParams) {
        let stack_trace = if self.full_diagnostics(end.duration()) {
            Some(StackTrace::capture())
        } else {
            None
        };

        let node = Node {
            stamp: end.stamp,
            start: end.start,
            end: end.end,
            name,
            params: NodeParams::build(stack_trace, segment),
        };

        match self.store.insert(node) {
            Retention::Added => {}
            Retention::Replaced(evicted) => {
                tracing::trace!(name = %evicted.name, "Evicted shorter trace node");
            }
            Retention::Rejected(node) => {
                tracing::trace!(name = %node.name, "Trace node rejected at capacity");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Retained nodes in start order
    pub fn nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.store.iter().collect();
        nodes.sort_by_key(|n| (n.start, n.stamp));
        nodes
    }

    /// Children of the transaction node.
    ///
    /// Each node hangs under the nearest retained segment that was open when
    /// it started. A node whose parent was evicted or filtered out moves up to
    /// its closest retained ancestor. Nesting is capped at [`MAX_TREE_DEPTH`].
    pub fn tree(&self) -> Vec<TraceNode<'_>> {
        // Ancestors always carry smaller stamps than their descendants
        let mut nodes: Vec<&Node> = self.store.iter().collect();
        nodes.sort_by_key(|n| n.stamp);
        let index: FxHashMap<u32, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.stamp, i))
            .collect();

        let mut attach: Vec<Option<usize>> = Vec::with_capacity(nodes.len());
        let mut depth: Vec<usize> = Vec::with_capacity(nodes.len());
        for node in &nodes {
            let (parent, level) = match self.retained_ancestor(node.stamp, &index) {
                None => (None, 1),
                Some(p) if depth[p] < MAX_TREE_DEPTH => (Some(p), depth[p] + 1),
                Some(p) => (attach[p], depth[p]),
            };
            attach.push(parent);
            depth.push(level);
        }

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut top = Vec::new();
        for (i, parent) in attach.iter().enumerate() {
            match parent {
                Some(p) => children[*p].push(i),
                None => top.push(i),
            }
        }

        let start_order = |&i: &usize| (nodes[i].start, nodes[i].stamp);
        top.sort_by_key(start_order);
        for list in &mut children {
            list.sort_by_key(start_order);
        }

        // Children have larger indices, so building back to front finds them
        // already assembled
        let mut built: Vec<Option<TraceNode<'_>>> = (0..nodes.len()).map(|_| None).collect();
        for i in (0..nodes.len()).rev() {
            let kids: Vec<TraceNode<'_>> = children[i]
                .iter()
                .filter_map(|&c| built[c].take())
                .collect();
            built[i] = Some(TraceNode {
                node: nodes[i],
                children: kids,
            });
        }

        top.iter().filter_map(|&i| built[i].take()).collect()
    }

    fn retained_ancestor(&self, stamp: u32, index: &FxHashMap<u32, usize>) -> Option<usize> {
        let mut parent = self.parent_of(stamp);
        while parent != ROOT_STAMP {
            if let Some(&i) = index.get(&parent) {
                return Some(i);
            }
            parent = self.parent_of(parent);
        }
        None
    }
}

/// A retained node with its children, in start order
#[derive(Debug)]
pub struct TraceNode<'a> {
    pub node: &'a Node,
    pub children: Vec<TraceNode<'a>>,
}

/// Serializes as `{}`
pub(crate) struct EmptyObject;

impl Serialize for EmptyObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        serializer.serialize_map(Some(0))?.end()
    }
}

// [startMs, endMs, name, params, children]
impl Serialize for TraceNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tup = serializer.serialize_tuple(5)?;
        tup.serialize_element(&self.node.start_ms())?;
        tup.serialize_element(&self.node.end_ms())?;
        tup.serialize_element(&self.node.name)?;
        match &self.node.params {
            Some(params) => tup.serialize_element(params)?,
            None => tup.serialize_element(&EmptyObject)?,
        }
        tup.serialize_element(&self.children)?;
        tup.end()
    }
}
