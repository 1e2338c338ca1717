use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::NodeId;

/// Category of a client-side validation failure. Serialized in kebab-case (`"trigger-cardinality"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationErrorKind {
    /// A second trigger, or a non-trigger as the first node of an empty graph.
    TriggerCardinality,
    /// Flow name is empty or still the `"Untitled"` placeholder.
    PlaceholderName,
    /// Test input is not valid JSON, not an object, or has a value of the wrong type.
    InvalidTestInput,
    /// A required test input field is missing or empty.
    MissingRequiredField,
    /// Referenced node does not exist in the graph.
    UnknownNode,
    /// Node id already used in this flow.
    DuplicateNode,
    /// Edge would connect a node to itself.
    SelfLoop,
    /// The same source, target and handle are already connected.
    DuplicateEdge,
    /// Edge targets a trigger node.
    TriggerIncomingEdge,
    /// Attempt to change a node's type in place.
    TypeChange,
    /// Node data patch does not fit the typed shape of the node.
    InvalidNodeData,
    /// The graph has no trigger node.
    MissingTrigger,
    /// Nothing follows the trigger.
    NoTerminalNode,
    /// A step cannot be reached from the trigger.
    OrphanNode,
    /// Operation needs a saved flow.
    NotPersisted,
    /// The flow was deleted in this session.
    FlowDeleted,
    /// A test run is already in flight.
    RunActive,
}

impl ValidationErrorKind {
    /// Stable kebab-case code, as printed by the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TriggerCardinality => "trigger-cardinality",
            Self::PlaceholderName => "placeholder-name",
            Self::InvalidTestInput => "invalid-test-input",
            Self::MissingRequiredField => "missing-required-field",
            Self::UnknownNode => "unknown-node",
            Self::DuplicateNode => "duplicate-node",
            Self::SelfLoop => "self-loop",
            Self::DuplicateEdge => "duplicate-edge",
            Self::TriggerIncomingEdge => "trigger-incoming-edge",
            Self::TypeChange => "type-change",
            Self::InvalidNodeData => "invalid-node-data",
            Self::MissingTrigger => "missing-trigger",
            Self::NoTerminalNode => "no-terminal-node",
            Self::OrphanNode => "orphan-node",
            Self::NotPersisted => "not-persisted",
            Self::FlowDeleted => "flow-deleted",
            Self::RunActive => "run-active",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-detected rule violation. Never reaches the network layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            node_id: None,
        }
    }

    pub fn with_node(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub(crate) fn unknown_node(node_id: &NodeId) -> Self {
        Self::new(
            ValidationErrorKind::UnknownNode,
            format!("node {node_id} does not exist in this flow"),
        )
        .with_node(node_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_in_kebab_case() {
        let json = serde_json::to_value(ValidationErrorKind::TriggerCardinality).unwrap();
        assert_eq!(json, serde_json::json!("trigger-cardinality"));
    }

    #[test]
    fn display_leads_with_kind() {
        let err = ValidationError::new(ValidationErrorKind::PlaceholderName, "pick a name");
        assert_eq!(err.to_string(), "placeholder-name: pick a name");
    }
}
