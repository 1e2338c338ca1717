//! Editor operations: translate canvas events (drop, connect, configure, rename) into graph
//! mutations and keep the selection pointing into the graph.

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{ValidationError, ValidationErrorKind};
use crate::model::{Edge, EdgeId, Flow, FlowDefinition, Node, NodeConfig, NodeId, NodeKind, Position};

/// Parsed drag payload: `"type"` or `"type:subtype"`; `trigger:<schedule|manual|api>` is accepted
/// as an alias for the trigger types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropToken {
    pub kind: NodeKind,
    pub subtype: Option<String>,
}

impl DropToken {
    /// `None` for missing or unknown type tokens.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let (head, tail) = match raw.split_once(':') {
            Some((head, tail)) => (head.trim(), Some(tail.trim()).filter(|t| !t.is_empty())),
            None => (raw, None),
        };
        if head == "trigger" {
            let kind = format!("trigger-{}", tail?).parse().ok()?;
            return Some(Self {
                kind,
                subtype: None,
            });
        }
        Some(Self {
            kind: head.parse().ok()?,
            subtype: tail.map(str::to_string),
        })
    }
}

/// One open flow plus the editor's selection.
///
/// The selection is only an id; [`FlowEditor::selected_node`] resolves it against the graph on
/// every read so the configuration panel and the canvas always show the same node.
#[derive(Debug, Clone)]
pub struct FlowEditor {
    flow: Flow,
    selected: Option<NodeId>,
}

impl FlowEditor {
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            selected: None,
        }
    }

    /// Editor over a new, unsaved `"Untitled"` flow.
    pub fn draft(org_id: impl Into<String>) -> Self {
        Self::new(Flow::draft(org_id))
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn into_flow(self) -> Flow {
        self.flow
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.flow.definition
    }

    /// Handle a palette drop. Malformed tokens are ignored (`Ok(None)`); the new node is selected.
    pub fn drop_node(
        &mut self,
        token: &str,
        position: Position,
    ) -> Result<Option<&Node>, ValidationError> {
        let Some(token) = DropToken::parse(token) else {
            debug!(event = "editor.drop_ignored", domain = "editor", token = token);
            return Ok(None);
        };
        let id = self
            .flow
            .definition
            .add_node(token.kind, token.subtype, position)?
            .id()
            .clone();
        self.selected = Some(id.clone());
        Ok(self.flow.definition.node(&id))
    }

    /// Drop a node and connect `from` to it in one step. Either both happen or neither does.
    pub fn drop_node_connected(
        &mut self,
        token: &str,
        position: Position,
        from: &NodeId,
    ) -> Result<Option<&Node>, ValidationError> {
        let Some(token) = DropToken::parse(token) else {
            debug!(event = "editor.drop_ignored", domain = "editor", token = token);
            return Ok(None);
        };
        let mut staged = self.flow.definition.clone();
        let id = staged
            .add_node(token.kind, token.subtype, position)?
            .id()
            .clone();
        staged.add_edge(from, &id)?;
        self.flow.definition = staged;
        self.selected = Some(id.clone());
        Ok(self.flow.definition.node(&id))
    }

    /// Connect two nodes; see [`FlowDefinition::add_edge`] for the rules.
    pub fn connect(&mut self, source: &NodeId, target: &NodeId) -> Result<&Edge, ValidationError> {
        self.flow.definition.add_edge(source, target)
    }

    /// Connect from a named output handle (a switch case key).
    pub fn connect_handle(
        &mut self,
        source: &NodeId,
        target: &NodeId,
        handle: impl Into<String>,
    ) -> Result<&Edge, ValidationError> {
        self.flow
            .definition
            .add_edge_from_handle(source, target, Some(handle.into()))
    }

    /// Remove an edge. Returns it if it existed.
    pub fn disconnect(&mut self, edge_id: &EdgeId) -> Option<Edge> {
        self.flow.definition.remove_edge(edge_id)
    }

    pub fn rename_node(&mut self, id: &NodeId, label: &str) -> Result<&Node, ValidationError> {
        self.flow.definition.rename_node(id, label)
    }

    pub fn move_node(&mut self, id: &NodeId, position: Position) -> Result<&Node, ValidationError> {
        self.flow.definition.move_node(id, position)
    }

    /// Merge a configuration patch into a node's data.
    pub fn configure_node(&mut self, id: &NodeId, patch: &Value) -> Result<&Node, ValidationError> {
        self.flow.definition.update_node_data(id, patch)
    }

    /// Merge a configuration patch into the selected node.
    pub fn configure_selected(&mut self, patch: &Value) -> Result<&Node, ValidationError> {
        let id = self.selected_id().cloned().ok_or_else(|| {
            ValidationError::new(ValidationErrorKind::UnknownNode, "no step is selected")
        })?;
        self.flow.definition.update_node_data(&id, patch)
    }

    pub fn set_node_config(
        &mut self,
        id: &NodeId,
        config: NodeConfig,
    ) -> Result<&Node, ValidationError> {
        self.flow.definition.set_node_config(id, config)
    }

    /// Remove a node and its edges; clears the selection if it pointed at the node.
    pub fn delete_node(&mut self, id: &NodeId) -> Option<Node> {
        let removed = self.flow.definition.remove_node(id)?;
        if self.selected.as_ref() == Some(id) {
            self.selected = None;
        }
        Some(removed)
    }

    /// Select an existing node so it can be configured or tested.
    pub fn select(&mut self, id: &NodeId) -> Result<&Node, ValidationError> {
        let node = self
            .flow
            .definition
            .node(id)
            .ok_or_else(|| ValidationError::unknown_node(id))?;
        self.selected = Some(id.clone());
        Ok(node)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Selected id, only while it still names a node in the graph.
    pub fn selected_id(&self) -> Option<&NodeId> {
        self.selected
            .as_ref()
            .filter(|id| self.flow.definition.contains_node(id))
    }

    pub fn selected_node(&self) -> Option<&Node> {
        self.selected
            .as_ref()
            .and_then(|id| self.flow.definition.node(id))
    }

    /// Set the flow name, trimmed. A placeholder name blocks saving, not editing.
    pub fn rename_flow(&mut self, name: &str) {
        self.flow.name = name.trim().to_string();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.flow.description = description.into();
    }

    pub fn set_viewport(&mut self, viewport: crate::model::Viewport) {
        self.flow.definition.viewport = viewport;
    }

    /// Store a run result on a node for its test result viewer.
    pub fn record_run_result(
        &mut self,
        id: &NodeId,
        result: Option<Value>,
    ) -> Result<(), ValidationError> {
        self.flow.definition.set_last_run_result(id, result)
    }

    /// Drop every node's last run result.
    pub fn clear_run_results(&mut self) {
        self.flow.definition.clear_run_results();
    }

    /// Take over the server-assigned id after a save. Returns `true` only on the first assignment;
    /// an already persisted flow keeps its id.
    pub fn adopt_saved(&mut self, saved: &Flow) -> bool {
        let Some(saved_id) = saved.id.as_ref() else {
            return false;
        };
        match &self.flow.id {
            Some(current) => {
                if current != saved_id {
                    warn!(
                        event = "editor.id_mismatch",
                        domain = "editor",
                        current = %current,
                        returned = %saved_id
                    );
                }
                false
            }
            None => {
                self.flow.id = Some(saved_id.clone());
                if self.flow.slug.trim().is_empty() {
                    self.flow.slug = saved.slug.clone();
                }
                debug!(event = "editor.id_assigned", domain = "editor", flow_id = %saved_id);
                true
            }
        }
    }

    pub fn set_active(&mut self, active: bool) {
        self.flow.is_active = active;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FlowId;
    use serde_json::json;

    fn at(x: f64) -> Position {
        Position::new(x, 0.0)
    }

    #[test]
    fn drop_tokens_parse_type_and_subtype() {
        assert_eq!(
            DropToken::parse("api-call:post"),
            Some(DropToken {
                kind: NodeKind::ApiCall,
                subtype: Some("post".into())
            })
        );
        assert_eq!(
            DropToken::parse("trigger:schedule").map(|t| t.kind),
            Some(NodeKind::TriggerSchedule)
        );
        assert_eq!(DropToken::parse("filter:").map(|t| t.subtype), Some(None));
        for bad in ["", "  ", "webhook", ":x", "trigger", "trigger:cosmic"] {
            assert_eq!(DropToken::parse(bad), None, "token {bad:?}");
        }
    }

    #[test]
    fn drop_scenario_enforces_trigger_first_and_single_trigger() {
        let mut editor = FlowEditor::draft("org-1");

        let err = editor.drop_node("human-task", at(0.0)).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::TriggerCardinality);
        assert!(editor.definition().is_empty());

        let trigger = editor.drop_node("trigger-manual", at(0.0)).unwrap().unwrap();
        assert_eq!(trigger.label(), "Untitled 1");

        let filter = editor.drop_node("filter", at(200.0)).unwrap().unwrap();
        assert_eq!(filter.label(), "Untitled 2");

        let err = editor.drop_node("trigger-manual", at(400.0)).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::TriggerCardinality);
        assert_eq!(editor.definition().nodes().len(), 2);
    }

    #[test]
    fn malformed_drop_is_ignored() {
        let mut editor = FlowEditor::draft("org-1");
        assert!(editor.drop_node("nonsense", at(0.0)).unwrap().is_none());
        assert!(editor.definition().is_empty());
        assert!(editor.selected_node().is_none());
    }

    #[test]
    fn connected_drop_is_all_or_nothing() {
        let mut editor = FlowEditor::draft("org-1");
        let trigger = editor
            .drop_node("trigger-api", at(0.0))
            .unwrap()
            .unwrap()
            .id()
            .clone();
        let ghost = NodeId::new("ghost");
        let before = editor.definition().clone();

        let err = editor
            .drop_node_connected("map", at(100.0), &ghost)
            .unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UnknownNode);
        assert_eq!(editor.definition(), &before);

        let node = editor
            .drop_node_connected("map", at(100.0), &trigger)
            .unwrap()
            .unwrap()
            .id()
            .clone();
        assert_eq!(editor.definition().edges().len(), 1);
        assert_eq!(editor.selected_id(), Some(&node));
    }

    #[test]
    fn selection_reads_through_to_the_graph() {
        let mut editor = FlowEditor::draft("org-1");
        editor.drop_node("trigger-manual", at(0.0)).unwrap();
        let task = editor
            .drop_node("human-task", at(100.0))
            .unwrap()
            .unwrap()
            .id()
            .clone();

        editor
            .configure_node(&task, &json!({ "instructions": "Check the invoice" }))
            .unwrap();
        let selected = editor.selected_node().unwrap();
        assert_eq!(selected.data().unwrap()["instructions"], json!("Check the invoice"));

        editor.configure_selected(&json!({ "label": "Review" })).unwrap();
        assert_eq!(editor.definition().node(&task).unwrap().label(), "Review");

        editor.delete_node(&task).unwrap();
        assert!(editor.selected_node().is_none());
        assert!(editor.configure_selected(&json!({})).is_err());
    }

    #[test]
    fn server_id_is_adopted_once() {
        let mut editor = FlowEditor::draft("org-1");
        editor.rename_flow("  Expense approval ");
        assert_eq!(editor.flow().name, "Expense approval");

        let mut saved = editor.flow().clone();
        saved.id = Some(FlowId::new("f-1"));
        saved.slug = "expense-approval".into();
        assert!(editor.adopt_saved(&saved));
        assert_eq!(editor.flow().id, Some(FlowId::new("f-1")));
        assert_eq!(editor.flow().slug, "expense-approval");

        saved.id = Some(FlowId::new("f-2"));
        assert!(!editor.adopt_saved(&saved));
        assert_eq!(editor.flow().id, Some(FlowId::new("f-1")));
    }

    #[test]
    fn run_results_annotate_nodes() {
        let mut editor = FlowEditor::draft("org-1");
        let trigger = editor
            .drop_node("trigger-manual", at(0.0))
            .unwrap()
            .unwrap()
            .id()
            .clone();
        editor
            .record_run_result(&trigger, Some(json!({ "status": "COMPLETED" })))
            .unwrap();
        assert!(editor.definition().node(&trigger).unwrap().last_run_result().is_some());
        editor.clear_run_results();
        assert!(editor.definition().node(&trigger).unwrap().last_run_result().is_none());
    }
}
