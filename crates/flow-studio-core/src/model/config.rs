//! Strongly-typed node configuration. One payload shape per node type; stored payloads are parsed
//! through the shape of their type so a missing field takes its default instead of surfacing later.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::payload::InputSchema;

/// Step type of a node. Immutable once the node exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    TriggerSchedule,
    TriggerManual,
    TriggerApi,
    HumanTask,
    Filter,
    Map,
    Switch,
    ApiCall,
}

impl NodeKind {
    pub const ALL: [NodeKind; 8] = [
        NodeKind::TriggerSchedule,
        NodeKind::TriggerManual,
        NodeKind::TriggerApi,
        NodeKind::HumanTask,
        NodeKind::Filter,
        NodeKind::Map,
        NodeKind::Switch,
        NodeKind::ApiCall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::TriggerSchedule => "trigger-schedule",
            NodeKind::TriggerManual => "trigger-manual",
            NodeKind::TriggerApi => "trigger-api",
            NodeKind::HumanTask => "human-task",
            NodeKind::Filter => "filter",
            NodeKind::Map => "map",
            NodeKind::Switch => "switch",
            NodeKind::ApiCall => "api-call",
        }
    }

    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            NodeKind::TriggerSchedule | NodeKind::TriggerManual | NodeKind::TriggerApi
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not a known node type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown node type: {0}")]
pub struct UnknownNodeKind(pub String);

impl FromStr for NodeKind {
    type Err = UnknownNodeKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownNodeKind(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleTriggerConfig {
    /// Cron expression evaluated by the remote engine.
    pub cron: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ManualTriggerConfig {}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiTriggerConfig {
    /// Declared input schema. When present, test runs must supply a matching payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<InputSchema>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HumanTaskConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    pub instructions: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_in_hours: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldMapping {
    pub target: String,
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    pub mappings: Vec<FieldMapping>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SwitchCase {
    /// Matches the `sourceHandle` of the outgoing edge for this branch.
    pub key: String,
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SwitchConfig {
    pub cases: Vec<SwitchCase>,
    pub default_case: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiCallConfig {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Typed configuration per node type.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeConfig {
    TriggerSchedule(ScheduleTriggerConfig),
    TriggerManual(ManualTriggerConfig),
    TriggerApi(ApiTriggerConfig),
    HumanTask(HumanTaskConfig),
    Filter(FilterConfig),
    Map(MapConfig),
    Switch(SwitchConfig),
    ApiCall(ApiCallConfig),
}

impl NodeConfig {
    pub fn default_for(kind: NodeKind) -> Self {
        match kind {
            NodeKind::TriggerSchedule => NodeConfig::TriggerSchedule(Default::default()),
            NodeKind::TriggerManual => NodeConfig::TriggerManual(Default::default()),
            NodeKind::TriggerApi => NodeConfig::TriggerApi(Default::default()),
            NodeKind::HumanTask => NodeConfig::HumanTask(Default::default()),
            NodeKind::Filter => NodeConfig::Filter(Default::default()),
            NodeKind::Map => NodeConfig::Map(Default::default()),
            NodeKind::Switch => NodeConfig::Switch(Default::default()),
            NodeKind::ApiCall => NodeConfig::ApiCall(Default::default()),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeConfig::TriggerSchedule(_) => NodeKind::TriggerSchedule,
            NodeConfig::TriggerManual(_) => NodeKind::TriggerManual,
            NodeConfig::TriggerApi(_) => NodeKind::TriggerApi,
            NodeConfig::HumanTask(_) => NodeKind::HumanTask,
            NodeConfig::Filter(_) => NodeKind::Filter,
            NodeConfig::Map(_) => NodeKind::Map,
            NodeConfig::Switch(_) => NodeKind::Switch,
            NodeConfig::ApiCall(_) => NodeKind::ApiCall,
        }
    }

    /// Declared input schema of an API trigger, if any.
    pub fn input_schema(&self) -> Option<&InputSchema> {
        match self {
            NodeConfig::TriggerApi(config) => config.input_schema.as_ref(),
            _ => None,
        }
    }

    /// Serialize the payload as a JSON object (the node's `data` minus its label).
    pub fn to_data(&self) -> Result<Map<String, Value>, serde_json::Error> {
        let value = match self {
            NodeConfig::TriggerSchedule(c) => serde_json::to_value(c)?,
            NodeConfig::TriggerManual(c) => serde_json::to_value(c)?,
            NodeConfig::TriggerApi(c) => serde_json::to_value(c)?,
            NodeConfig::HumanTask(c) => serde_json::to_value(c)?,
            NodeConfig::Filter(c) => serde_json::to_value(c)?,
            NodeConfig::Map(c) => serde_json::to_value(c)?,
            NodeConfig::Switch(c) => serde_json::to_value(c)?,
            NodeConfig::ApiCall(c) => serde_json::to_value(c)?,
        };
        Ok(match value {
            Value::Object(map) => map,
            _ => Map::new(),
        })
    }

    /// Parse a stored payload through the shape of `kind`. `null` is read as an empty payload.
    pub fn from_data(kind: NodeKind, data: Value) -> Result<Self, serde_json::Error> {
        let data = match data {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        Ok(match kind {
            NodeKind::TriggerSchedule => NodeConfig::TriggerSchedule(serde_json::from_value(data)?),
            NodeKind::TriggerManual => NodeConfig::TriggerManual(serde_json::from_value(data)?),
            NodeKind::TriggerApi => NodeConfig::TriggerApi(serde_json::from_value(data)?),
            NodeKind::HumanTask => NodeConfig::HumanTask(serde_json::from_value(data)?),
            NodeKind::Filter => NodeConfig::Filter(serde_json::from_value(data)?),
            NodeKind::Map => NodeConfig::Map(serde_json::from_value(data)?),
            NodeKind::Switch => NodeConfig::Switch(serde_json::from_value(data)?),
            NodeKind::ApiCall => NodeConfig::ApiCall(serde_json::from_value(data)?),
        })
    }
}
