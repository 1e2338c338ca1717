//! Request and response bodies of the flow API (snake_case JSON).

use std::borrow::Cow;
use std::fmt;

use flow_studio_core::{Flow, FlowDefinition, FlowId, NodeKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of `POST /flows` and `PUT /flows/{id}`.
#[derive(Debug, Serialize)]
pub struct FlowBody<'a> {
    pub org_id: &'a str,
    pub slug: Cow<'a, str>,
    pub name: &'a str,
    pub description: &'a str,
    pub definition: &'a FlowDefinition,
    pub variables_schema: &'a Value,
}

impl<'a> FlowBody<'a> {
    pub fn from_flow(flow: &'a Flow) -> Self {
        Self {
            org_id: &flow.org_id,
            slug: flow.effective_slug(),
            name: flow.name.trim(),
            description: &flow.description,
            definition: &flow.definition,
            variables_schema: &flow.variables_schema,
        }
    }
}

/// Body of `POST /test/flow`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestFlowRequest {
    pub flow_definition: FlowDefinition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<FlowId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

/// Identity of a test run on the remote engine. All in-flight state is keyed by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    pub workflow_id: String,
    pub run_id: String,
}

impl RunKey {
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.run_id)
    }
}

/// Run status reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Terminated,
    /// Any status this client does not know; treated as still running.
    Other(String),
}

impl RunStatus {
    /// `COMPLETED`, `FAILED` or `TERMINATED`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Terminated
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
            RunStatus::Terminated => "TERMINATED",
            RunStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for RunStatus {
    fn from(raw: String) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" => RunStatus::Pending,
            "RUNNING" => RunStatus::Running,
            "COMPLETED" => RunStatus::Completed,
            "FAILED" | "TIMED_OUT" => RunStatus::Failed,
            "TERMINATED" | "CANCELED" | "CANCELLED" => RunStatus::Terminated,
            _ => RunStatus::Other(raw),
        }
    }
}

impl From<RunStatus> for String {
    fn from(status: RunStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `GET /test/flow/{run_id}` once the run is known.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// Acknowledgement of `POST /test/flow/cancel`, optionally carrying the run's final status.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CancelAck {
    #[serde(default)]
    pub status: Option<RunStatus>,
}

/// Body of `POST /test/node`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeTestRequest {
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub config: Value,
    pub input: Value,
}
