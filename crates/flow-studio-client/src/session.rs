//! One open flow: the editor plus everything that talks to the server on its behalf.

use std::sync::Arc;

use flow_studio_core::validate::{self, SaveRules};
use flow_studio_core::{
    Flow, FlowEditor, FlowId, NodeId, PublishStatus, PublishTracker, ToolbarInputs, ToolbarState,
    ValidationError, ValidationErrorKind, project_toolbar,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::api::{FlowApi, HttpFlowApi};
use crate::config::FlowStudioClientConfig;
use crate::console::ExecutionConsole;
use crate::controller::{TestExecutionController, TestPhase, TestRequest, TestRunHandle};
use crate::errors::FlowStudioError;
use crate::persistence::{FlowPersistence, SaveOutcome};
use crate::status_source::{PollingStatusSource, RunStatusSource};
use crate::wire::NodeTestRequest;

/// Remote collaborators of a session.
#[derive(Clone)]
pub struct Backends {
    pub api: Arc<dyn FlowApi>,
    pub status: Arc<dyn RunStatusSource>,
}

impl Backends {
    pub fn new(api: Arc<dyn FlowApi>, status: Arc<dyn RunStatusSource>) -> Self {
        Self { api, status }
    }

    /// HTTP API with polling status delivery.
    pub fn http(config: &FlowStudioClientConfig) -> Result<Self, FlowStudioError> {
        let api: Arc<dyn FlowApi> = Arc::new(HttpFlowApi::new(config)?);
        let status = Arc::new(PollingStatusSource::new(api.clone(), config.poll));
        Ok(Self { api, status })
    }
}

pub struct FlowSession {
    editor: FlowEditor,
    persistence: FlowPersistence,
    controller: TestExecutionController,
    tracker: PublishTracker,
    location: Option<String>,
    deleted: bool,
}

fn location_of(id: &FlowId) -> String {
    format!("/flows/{id}")
}

impl FlowSession {
    pub fn new_draft(org_id: impl Into<String>, backends: Backends) -> Self {
        Self::from_flow(Flow::draft(org_id), backends)
    }

    pub fn from_flow(flow: Flow, backends: Backends) -> Self {
        let mut tracker = PublishTracker::new();
        tracker.on_loaded(&flow);
        let location = flow.id().map(location_of);
        Self {
            editor: FlowEditor::new(flow),
            persistence: FlowPersistence::new(backends.api.clone()),
            controller: TestExecutionController::new(
                backends.api,
                backends.status,
                ExecutionConsole::default(),
            ),
            tracker,
            location,
            deleted: false,
        }
    }

    /// Load a stored flow by id.
    pub async fn open(id: &FlowId, backends: Backends) -> Result<Self, FlowStudioError> {
        let flow = FlowPersistence::new(backends.api.clone()).load(id).await?;
        Ok(Self::from_flow(flow, backends))
    }

    pub fn with_save_rules(mut self, rules: SaveRules) -> Self {
        self.persistence = self.persistence.with_rules(rules);
        self
    }

    pub fn editor(&self) -> &FlowEditor {
        &self.editor
    }

    /// Mutable editor access; refused once the flow is deleted.
    pub fn editor_mut(&mut self) -> Result<&mut FlowEditor, FlowStudioError> {
        self.ensure_live()?;
        Ok(&mut self.editor)
    }

    pub fn flow(&self) -> &Flow {
        self.editor.flow()
    }

    /// `/flows/{id}` once the flow has been stored.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Set after a successful delete; every mutating call is refused from then on.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn console(&self) -> &ExecutionConsole {
        self.controller.console()
    }

    /// Read-only view of the test controller; runs are started through the session.
    pub fn controller(&self) -> &TestExecutionController {
        &self.controller
    }

    fn ensure_live(&self) -> Result<(), FlowStudioError> {
        if self.deleted {
            return Err(ValidationError::new(
                ValidationErrorKind::FlowDeleted,
                "This flow has been deleted.",
            )
            .into());
        }
        Ok(())
    }

    fn persisted_id(&self) -> Result<FlowId, FlowStudioError> {
        self.editor.flow().id().cloned().ok_or_else(|| {
            ValidationError::new(
                ValidationErrorKind::NotPersisted,
                "Save the flow before doing that.",
            )
            .into()
        })
    }

    /// Validate and store the flow. The first successful save adopts the server id.
    pub async fn save(&mut self) -> Result<SaveOutcome, FlowStudioError> {
        self.ensure_live()?;
        let outcome = self.persistence.save(self.editor.flow()).await?;
        if self.editor.adopt_saved(outcome.flow()) {
            if let Some(id) = self.editor.flow().id() {
                let location = location_of(id);
                info!(event = "session.location_assigned", domain = "session", location = %location);
                self.location = Some(location);
            }
        }
        Ok(outcome)
    }

    /// Save, then publish. The published snapshot is the definition that was saved.
    pub async fn publish(&mut self) -> Result<(), FlowStudioError> {
        self.save().await?;
        let id = self.persisted_id()?;
        self.persistence.publish(&id).await?;
        self.editor.set_active(true);
        self.tracker.on_published(self.editor.definition());
        Ok(())
    }

    /// Rename locally, and remotely when the flow is stored.
    pub async fn rename(&mut self, name: &str) -> Result<(), FlowStudioError> {
        self.ensure_live()?;
        validate::validate_flow_name(name)?;
        if let Some(id) = self.editor.flow().id().cloned() {
            self.persistence.rename(&id, name).await?;
        }
        self.editor.rename_flow(name);
        Ok(())
    }

    /// Delete the stored flow. Afterwards every mutation and persistence call is refused.
    pub async fn delete(&mut self) -> Result<(), FlowStudioError> {
        self.ensure_live()?;
        let id = self.persisted_id()?;
        if self.controller.cancel() {
            debug!(event = "session.run_cancelled_for_delete", domain = "session", flow_id = %id);
        }
        self.persistence.delete(&id).await?;
        self.deleted = true;
        info!(event = "session.deleted", domain = "session", flow_id = %id);
        Ok(())
    }

    /// Test the current definition, saved or not. Status lands on the selected node, or on the
    /// trigger when nothing is selected.
    pub fn start_test(&mut self, input: Option<Value>) -> Result<TestRunHandle, FlowStudioError> {
        self.ensure_live()?;
        let request = TestRequest {
            definition: self.editor.definition().clone(),
            flow_id: self.editor.flow().id().cloned(),
            input,
            focus: self.editor.selected_id().cloned(),
        };
        self.controller.start(request)
    }

    /// Ask the current run to stop. Returns `false` when nothing is cancellable.
    pub fn cancel_test(&self) -> bool {
        self.controller.cancel()
    }

    pub fn test_phase(&self) -> TestPhase {
        self.controller.phase()
    }

    /// Copy pending run updates onto their nodes. Returns how many were applied.
    ///
    /// Call after each phase change and once after the run ends; updates still queued when the
    /// next run starts are dropped.
    pub fn apply_run_updates(&mut self) -> usize {
        let mut applied = 0;
        for update in self.controller.drain_updates() {
            match self
                .editor
                .record_run_result(&update.node_id, Some(update.annotation()))
            {
                Ok(()) => applied += 1,
                Err(err) => {
                    debug!(event = "session.update_skipped", domain = "session", error = %err);
                }
            }
        }
        applied
    }

    /// Dry-run one node with `input` and keep the result on the node.
    pub async fn test_node(&mut self, node_id: &NodeId, input: Value) -> Result<Value, FlowStudioError> {
        self.ensure_live()?;
        let node = self.editor.definition().node(node_id).ok_or_else(|| {
            ValidationError::new(ValidationErrorKind::UnknownNode, "That step no longer exists.")
                .with_node(node_id.clone())
        })?;
        let config = node.config().to_data().map_err(|e| {
            ValidationError::new(
                ValidationErrorKind::InvalidNodeData,
                format!("step configuration could not be encoded: {e}"),
            )
            .with_node(node_id.clone())
        })?;
        let request = NodeTestRequest {
            kind: node.kind(),
            config: Value::Object(config),
            input,
        };
        let result = self.controller.test_node(&request).await?;
        self.editor.record_run_result(node_id, Some(result.clone()))?;
        Ok(result)
    }

    /// Draft, published or changed, relative to the last published snapshot.
    pub fn publish_status(&self) -> PublishStatus {
        self.tracker.status(self.editor.flow())
    }

    /// `busy` is supplied by the caller while a save, publish, or delete is in flight.
    pub fn toolbar_inputs(&self, busy: bool) -> ToolbarInputs {
        let phase = self.controller.phase();
        ToolbarInputs {
            status: self.publish_status(),
            persisted: self.editor.flow().is_persisted(),
            placeholder_name: self.editor.flow().has_placeholder_name(),
            busy,
            run_active: phase.is_active(),
            run_cancellable: phase.is_cancellable(),
            deleted: self.deleted,
        }
    }

    pub fn toolbar(&self, busy: bool) -> ToolbarState {
        project_toolbar(&self.toolbar_inputs(busy))
    }
}
