use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::config::{NodeConfig, NodeKind};
use super::ids::{EdgeId, NodeId};
use super::naming::next_default_label;
use super::node::{Node, Position};
use crate::errors::{ValidationError, ValidationErrorKind};
use crate::validate;

/// Connection between two nodes. `source_handle` names the outgoing branch of a switch.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

/// Canvas viewport. Presentation only; ignored by structural comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            zoom: 1.0,
        }
    }
}

/// Graph of a flow: nodes, edges, and viewport.
///
/// Every mutation either applies completely or returns an error and leaves the graph untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FlowDefinition {
    #[serde(default)]
    pub(crate) nodes: Vec<Node>,
    #[serde(default)]
    pub(crate) edges: Vec<Edge>,
    #[serde(default)]
    pub viewport: Viewport,
}

impl FlowDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Nodes in insertion order. The first trigger added is the flow's trigger.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id.
    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.node(id).is_some()
    }

    fn node_index(&self, id: &NodeId) -> Result<usize, ValidationError> {
        self.nodes
            .iter()
            .position(|n| &n.id == id)
            .ok_or_else(|| ValidationError::unknown_node(id))
    }

    /// Every trigger node. A valid graph has exactly one.
    pub fn triggers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_trigger())
    }

    /// The flow's trigger node (the first, if a loaded graph carries several).
    pub fn trigger(&self) -> Option<&Node> {
        self.triggers().next()
    }

    /// Add a node of `kind` with the next default label.
    pub fn add_node(
        &mut self,
        kind: NodeKind,
        subtype: Option<String>,
        position: Position,
    ) -> Result<&Node, ValidationError> {
        validate::check_node_insertion(self, kind)?;
        let label = next_default_label(self.nodes.iter().map(|n| n.label()));
        let node = Node::new(NodeId::generate(), NodeConfig::default_for(kind), position)
            .with_label(label)
            .with_subtype(subtype.filter(|s| !s.trim().is_empty()));
        debug!(
            event = "graph.node_added",
            domain = "graph",
            node_id = %node.id,
            node_type = %kind,
            label = %node.label
        );
        let idx = self.nodes.len();
        self.nodes.push(node);
        Ok(&self.nodes[idx])
    }

    /// Insert a fully built node (e.g. pasted or loaded). Same rules as [`FlowDefinition::add_node`],
    /// plus id uniqueness.
    pub fn insert_node(&mut self, node: Node) -> Result<&Node, ValidationError> {
        if self.contains_node(&node.id) {
            return Err(ValidationError::new(
                ValidationErrorKind::DuplicateNode,
                format!("node id {} is already used in this flow", node.id),
            )
            .with_node(node.id.clone()));
        }
        validate::check_node_insertion(self, node.kind())?;
        let idx = self.nodes.len();
        self.nodes.push(node);
        Ok(&self.nodes[idx])
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &NodeId) -> Option<Node> {
        let idx = self.nodes.iter().position(|n| &n.id == id)?;
        let node = self.nodes.remove(idx);
        let before = self.edges.len();
        self.edges.retain(|e| &e.source != id && &e.target != id);
        debug!(
            event = "graph.node_removed",
            domain = "graph",
            node_id = %id,
            edges_removed = (before - self.edges.len()) as u64
        );
        Some(node)
    }

    /// Connect `source` to `target` from the default output.
    ///
    /// Rejects unknown endpoints, self-loops, duplicates and edges into a trigger; the graph is
    /// unchanged on error.
    pub fn add_edge(&mut self, source: &NodeId, target: &NodeId) -> Result<&Edge, ValidationError> {
        self.add_edge_from_handle(source, target, None)
    }

    /// Connect `source` to `target` from a named output handle (switch branches).
    pub fn add_edge_from_handle(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        source_handle: Option<String>,
    ) -> Result<&Edge, ValidationError> {
        validate::check_edge(self, source, target, source_handle.as_deref())?;
        let edge = Edge {
            id: EdgeId::generate(),
            source: source.clone(),
            target: target.clone(),
            source_handle,
        };
        debug!(
            event = "graph.edge_added",
            domain = "graph",
            edge_id = %edge.id,
            source = %edge.source,
            target = %edge.target
        );
        let idx = self.edges.len();
        self.edges.push(edge);
        Ok(&self.edges[idx])
    }

    /// Remove an edge by id. Unknown ids are ignored.
    pub fn remove_edge(&mut self, id: &EdgeId) -> Option<Edge> {
        let idx = self.edges.iter().position(|e| &e.id == id)?;
        Some(self.edges.remove(idx))
    }

    /// Set a node's display label. Surrounding whitespace is trimmed and blank labels are rejected.
    pub fn rename_node(&mut self, id: &NodeId, label: &str) -> Result<&Node, ValidationError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(ValidationError::new(
                ValidationErrorKind::InvalidNodeData,
                "node label must not be empty",
            )
            .with_node(id.clone()));
        }
        let idx = self.node_index(id)?;
        self.nodes[idx].label = label.to_string();
        Ok(&self.nodes[idx])
    }

    /// Place a node on the canvas. Edges and data are untouched.
    pub fn move_node(&mut self, id: &NodeId, position: Position) -> Result<&Node, ValidationError> {
        let idx = self.node_index(id)?;
        self.nodes[idx].position = position;
        Ok(&self.nodes[idx])
    }

    /// Replace a node's configuration. The variant must match the node's type.
    pub fn set_node_config(
        &mut self,
        id: &NodeId,
        config: NodeConfig,
    ) -> Result<&Node, ValidationError> {
        let idx = self.node_index(id)?;
        let current = self.nodes[idx].kind();
        if config.kind() != current {
            return Err(type_change(id, current, config.kind()));
        }
        self.nodes[idx].config = config;
        Ok(&self.nodes[idx])
    }

    /// Shallow-merge `patch` into the node's `data`, re-parsed through the node's typed shape.
    ///
    /// `null` values remove a field (falling back to its default). A `label` key renames the node.
    /// A `type` key naming a different type is rejected: types change only by delete + re-add.
    pub fn update_node_data(&mut self, id: &NodeId, patch: &Value) -> Result<&Node, ValidationError> {
        let idx = self.node_index(id)?;
        let node = &self.nodes[idx];
        let Value::Object(patch) = patch else {
            return Err(invalid_data(id, "node data patch must be a JSON object"));
        };
        if let Some(requested) = patch.get("type") {
            let requested_kind = requested.as_str().and_then(|s| s.parse::<NodeKind>().ok());
            if requested_kind != Some(node.kind()) {
                let shown = requested_kind.map_or_else(|| requested.to_string(), |k| k.to_string());
                return Err(type_change(id, node.kind(), shown));
            }
        }

        let mut data = node
            .config
            .to_data()
            .map_err(|e| invalid_data(id, format!("node data is not serializable: {e}")))?;
        let mut label = node.label.clone();
        for (key, value) in patch {
            match key.as_str() {
                "type" => {}
                "label" => match value {
                    Value::String(s) if !s.trim().is_empty() => label = s.trim().to_string(),
                    _ => return Err(invalid_data(id, "label must be a non-empty string")),
                },
                _ if value.is_null() => {
                    data.remove(key);
                }
                _ => {
                    data.insert(key.clone(), value.clone());
                }
            }
        }
        let config = NodeConfig::from_data(node.kind(), Value::Object(data))
            .map_err(|e| invalid_data(id, format!("invalid {} configuration: {e}", node.kind())))?;

        let node = &mut self.nodes[idx];
        node.config = config;
        node.label = label;
        Ok(node)
    }

    /// Record (or clear) the run annotation shown by the node's test result viewer.
    pub fn set_last_run_result(
        &mut self,
        id: &NodeId,
        result: Option<Value>,
    ) -> Result<(), ValidationError> {
        let idx = self.node_index(id)?;
        self.nodes[idx].last_run_result = result;
        Ok(())
    }

    /// Drop every run annotation.
    pub fn clear_run_results(&mut self) {
        for node in &mut self.nodes {
            node.last_run_result = None;
        }
    }

    /// Structural equality: same nodes (id, type, subtype, position, label, config) and same
    /// edges, regardless of order. Viewport and run annotations are not compared.
    pub fn structurally_eq(&self, other: &FlowDefinition) -> bool {
        if self.nodes.len() != other.nodes.len() || self.edges.len() != other.edges.len() {
            return false;
        }
        let mut left: Vec<&Node> = self.nodes.iter().collect();
        let mut right: Vec<&Node> = other.nodes.iter().collect();
        left.sort_by(|a, b| a.id.cmp(&b.id));
        right.sort_by(|a, b| a.id.cmp(&b.id));
        if !left.iter().zip(&right).all(|(a, b)| a.same_structure(b)) {
            return false;
        }
        let mut left_edges: Vec<&Edge> = self.edges.iter().collect();
        let mut right_edges: Vec<&Edge> = other.edges.iter().collect();
        left_edges.sort();
        right_edges.sort();
        left_edges == right_edges
    }
}

fn type_change(id: &NodeId, current: NodeKind, requested: impl fmt::Display) -> ValidationError {
    ValidationError::new(
        ValidationErrorKind::TypeChange,
        format!("node {id} is a {current} step; remove it and add a {requested} step instead"),
    )
    .with_node(id.clone())
}

fn invalid_data(id: &NodeId, message: impl Into<String>) -> ValidationError {
    ValidationError::new(ValidationErrorKind::InvalidNodeData, message).with_node(id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::{FilterConfig, HumanTaskConfig};
    use serde_json::json;

    fn origin() -> Position {
        Position::default()
    }

    fn graph_with_trigger() -> (FlowDefinition, NodeId) {
        let mut def = FlowDefinition::new();
        let id = def
            .add_node(NodeKind::TriggerManual, None, origin())
            .unwrap()
            .id()
            .clone();
        (def, id)
    }

    #[test]
    fn first_node_must_be_trigger() {
        let mut def = FlowDefinition::new();
        let err = def.add_node(NodeKind::HumanTask, None, origin()).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::TriggerCardinality);
        assert!(def.is_empty());
    }

    #[test]
    fn second_trigger_is_rejected_without_mutation() {
        let (mut def, _) = graph_with_trigger();
        def.add_node(NodeKind::Filter, None, origin()).unwrap();
        let before = def.clone();
        for kind in [
            NodeKind::TriggerManual,
            NodeKind::TriggerSchedule,
            NodeKind::TriggerApi,
        ] {
            let err = def.add_node(kind, None, origin()).unwrap_err();
            assert_eq!(err.kind, ValidationErrorKind::TriggerCardinality);
        }
        assert_eq!(def, before);
        assert_eq!(def.triggers().count(), 1);
    }

    #[test]
    fn labels_follow_max_suffix_after_deletions() {
        let (mut def, _) = graph_with_trigger();
        let second = def.add_node(NodeKind::Filter, None, origin()).unwrap().id().clone();
        def.add_node(NodeKind::Map, None, origin()).unwrap();
        def.remove_node(&second);
        let next = def.add_node(NodeKind::Switch, None, origin()).unwrap();
        assert_eq!(next.label(), "Untitled 4");
    }

    #[test]
    fn remove_node_drops_incident_edges() {
        let (mut def, trigger) = graph_with_trigger();
        let a = def.add_node(NodeKind::Filter, None, origin()).unwrap().id().clone();
        let b = def.add_node(NodeKind::Map, None, origin()).unwrap().id().clone();
        def.add_edge(&trigger, &a).unwrap();
        def.add_edge(&a, &b).unwrap();
        let removed = def.remove_node(&a).unwrap();
        assert_eq!(removed.id(), &a);
        assert!(def.edges().is_empty());
        assert!(def.remove_node(&a).is_none());
    }

    #[test]
    fn edge_rules_reject_bad_connections() {
        let (mut def, trigger) = graph_with_trigger();
        let a = def.add_node(NodeKind::Filter, None, origin()).unwrap().id().clone();
        let ghost = NodeId::new("ghost");

        let self_loop = def.add_edge(&a, &a).unwrap_err();
        assert_eq!(self_loop.kind, ValidationErrorKind::SelfLoop);
        let dangling = def.add_edge(&a, &ghost).unwrap_err();
        assert_eq!(dangling.kind, ValidationErrorKind::UnknownNode);
        let into_trigger = def.add_edge(&a, &trigger).unwrap_err();
        assert_eq!(into_trigger.kind, ValidationErrorKind::TriggerIncomingEdge);

        def.add_edge(&trigger, &a).unwrap();
        let dup = def.add_edge(&trigger, &a).unwrap_err();
        assert_eq!(dup.kind, ValidationErrorKind::DuplicateEdge);
        assert_eq!(def.edges().len(), 1);
    }

    #[test]
    fn switch_branches_may_share_a_target_through_distinct_handles() {
        let (mut def, trigger) = graph_with_trigger();
        let switch = def.add_node(NodeKind::Switch, None, origin()).unwrap().id().clone();
        let sink = def.add_node(NodeKind::HumanTask, None, origin()).unwrap().id().clone();
        def.add_edge(&trigger, &switch).unwrap();
        def.add_edge_from_handle(&switch, &sink, Some("high".into())).unwrap();
        def.add_edge_from_handle(&switch, &sink, Some("low".into())).unwrap();
        assert_eq!(def.edges().len(), 3);
    }

    #[test]
    fn update_node_data_merges_and_reparses() {
        let (mut def, _) = graph_with_trigger();
        let task = def.add_node(NodeKind::HumanTask, None, origin()).unwrap().id().clone();
        let node = def
            .update_node_data(&task, &json!({ "assignee": "finance", "label": "Approve" }))
            .unwrap();
        assert_eq!(node.label(), "Approve");
        assert_eq!(
            node.config(),
            &NodeConfig::HumanTask(HumanTaskConfig {
                assignee: Some("finance".into()),
                ..Default::default()
            })
        );

        let node = def.update_node_data(&task, &json!({ "assignee": null })).unwrap();
        assert_eq!(node.config(), &NodeConfig::HumanTask(HumanTaskConfig::default()));
    }

    #[test]
    fn update_node_data_rejects_type_change_and_bad_shapes_atomically() {
        let (mut def, _) = graph_with_trigger();
        let filter = def.add_node(NodeKind::Filter, None, origin()).unwrap().id().clone();
        def.update_node_data(&filter, &json!({ "condition": "x > 1" })).unwrap();
        let before = def.clone();

        let err = def
            .update_node_data(&filter, &json!({ "type": "map", "condition": "y" }))
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::TypeChange);

        let err = def
            .update_node_data(&filter, &json!({ "label": "ok", "condition": ["bad"] }))
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::InvalidNodeData);

        let err = def.update_node_data(&filter, &json!("nope")).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::InvalidNodeData);

        assert_eq!(def, before);
    }

    #[test]
    fn set_node_config_refuses_other_variant() {
        let (mut def, trigger) = graph_with_trigger();
        let err = def
            .set_node_config(&trigger, NodeConfig::Filter(FilterConfig::default()))
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::TypeChange);
    }

    #[test]
    fn structural_equality_ignores_viewport_and_annotations() {
        let (mut def, trigger) = graph_with_trigger();
        let snapshot = def.clone();
        def.viewport.zoom = 2.5;
        def.set_last_run_result(&trigger, Some(json!({ "ok": true }))).unwrap();
        assert!(def.structurally_eq(&snapshot));

        def.move_node(&trigger, Position::new(40.0, 0.0)).unwrap();
        assert!(!def.structurally_eq(&snapshot));
    }

    #[test]
    fn definition_serde_round_trip_preserves_structure() {
        let (mut def, trigger) = graph_with_trigger();
        let a = def.add_node(NodeKind::ApiCall, Some("post".into()), Position::new(5.0, 9.0))
            .unwrap()
            .id()
            .clone();
        def.add_edge(&trigger, &a).unwrap();
        def.update_node_data(&a, &json!({ "url": "https://hooks.test/x", "method": "POST" }))
            .unwrap();

        let json = serde_json::to_string(&def).unwrap();
        let restored: FlowDefinition = serde_json::from_str(&json).unwrap();
        assert!(restored.structurally_eq(&def));
        assert_eq!(restored, def);
    }
}
