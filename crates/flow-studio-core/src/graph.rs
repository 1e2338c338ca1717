//! Graph helpers over a flow definition: successors, predecessors, sinks, reachability.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::model::{FlowDefinition, NodeId};

/// Nodes that have an edge from `from_id`, in edge order.
pub fn successors<'a>(def: &'a FlowDefinition, from_id: &NodeId) -> Vec<&'a NodeId> {
    def.edges()
        .iter()
        .filter(|e| &e.source == from_id)
        .map(|e| &e.target)
        .collect()
}

/// Nodes that have an edge to `to_id`, in edge order.
pub fn predecessors<'a>(def: &'a FlowDefinition, to_id: &NodeId) -> Vec<&'a NodeId> {
    def.edges()
        .iter()
        .filter(|e| &e.target == to_id)
        .map(|e| &e.source)
        .collect()
}

/// Nodes with no outgoing edges (terminal steps), in node order.
pub fn sinks(def: &FlowDefinition) -> Vec<&NodeId> {
    let has_outgoing: HashSet<&NodeId> = def.edges().iter().map(|e| &e.source).collect();
    def.nodes()
        .iter()
        .map(|n| n.id())
        .filter(|id| !has_outgoing.contains(id))
        .collect()
}

/// Every node reachable from `start` (inclusive) following edges forward, breadth first.
pub fn reachable_from<'a>(def: &'a FlowDefinition, start: &'a NodeId) -> BTreeSet<&'a NodeId> {
    let mut seen = BTreeSet::new();
    if !def.contains_node(start) {
        return seen;
    }
    let mut queue = VecDeque::from([start]);
    seen.insert(start);
    while let Some(current) = queue.pop_front() {
        for next in successors(def, current) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

/// Nodes not reachable from `start`, in node order.
pub fn unreachable_from<'a>(def: &'a FlowDefinition, start: &'a NodeId) -> Vec<&'a NodeId> {
    let reached = reachable_from(def, start);
    def.nodes()
        .iter()
        .map(|n| n.id())
        .filter(|id| !reached.contains(id))
        .collect()
}
