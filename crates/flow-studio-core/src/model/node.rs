use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use super::config::{NodeConfig, NodeKind};
use super::ids::NodeId;

/// Canvas position of a node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A typed step in a flow.
///
/// On the wire a node looks like `{id, type, subtype?, position, data, lastRunResult?}` where
/// `data` holds the label plus the type-specific configuration. The type is derived from the
/// configuration variant, so it cannot drift from the payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawNode")]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) subtype: Option<String>,
    pub(crate) position: Position,
    pub(crate) label: String,
    pub(crate) config: NodeConfig,
    pub(crate) last_run_result: Option<Value>,
}

impl Node {
    pub fn new(id: NodeId, config: NodeConfig, position: Position) -> Self {
        Self {
            id,
            subtype: None,
            position,
            label: String::new(),
            config,
            last_run_result: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_subtype(mut self, subtype: Option<String>) -> Self {
        self.subtype = subtype;
        self
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.config.kind()
    }

    pub fn is_trigger(&self) -> bool {
        self.kind().is_trigger()
    }

    pub fn subtype(&self) -> Option<&str> {
        self.subtype.as_deref()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Result of the most recent test run that touched this node.
    pub fn last_run_result(&self) -> Option<&Value> {
        self.last_run_result.as_ref()
    }

    /// The `data` object as stored: configuration fields plus `label`.
    pub fn data(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let mut data = self.config.to_data()?;
        data.insert("label".into(), Value::String(self.label.clone()));
        Ok(data)
    }

    /// Same node with the run annotation dropped; used for structural comparison.
    pub(crate) fn same_structure(&self, other: &Node) -> bool {
        self.id == other.id
            && self.subtype == other.subtype
            && self.position == other.position
            && self.label == other.label
            && self.config == other.config
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawNodeRef<'a> {
    id: &'a NodeId,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtype: Option<&'a str>,
    position: Position,
    data: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_run_result: Option<&'a Value>,
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let data = self.data().map_err(serde::ser::Error::custom)?;
        RawNodeRef {
            id: &self.id,
            kind: self.kind(),
            subtype: self.subtype.as_deref(),
            position: self.position,
            data,
            last_run_result: self.last_run_result.as_ref(),
        }
        .serialize(serializer)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    id: NodeId,
    #[serde(rename = "type")]
    kind: NodeKind,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    position: Position,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    last_run_result: Option<Value>,
}

impl TryFrom<RawNode> for Node {
    type Error = String;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let mut data = match raw.data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => return Err(format!("node {} data must be an object, got {other}", raw.id)),
        };
        let label = match data.remove("label") {
            Some(Value::String(label)) => label,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let config = NodeConfig::from_data(raw.kind, Value::Object(data))
            .map_err(|e| format!("node {} has invalid {} data: {e}", raw.id, raw.kind))?;
        Ok(Node {
            id: raw.id,
            subtype: raw.subtype.filter(|s| !s.is_empty()),
            position: raw.position,
            label,
            config,
            last_run_result: raw.last_run_result,
        })
    }
}
