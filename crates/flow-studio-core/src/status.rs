//! Publish status and toolbar affordances derived from the open flow.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Flow, FlowDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    /// Never saved.
    Draft,
    /// Saved, and the definition equals the last published snapshot.
    Published,
    /// Saved, but unpublished or edited since the last publish.
    Changed,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Draft => "draft",
            PublishStatus::Published => "published",
            PublishStatus::Changed => "changed",
        }
    }
}

impl fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `draft` iff the flow has no id; otherwise `published` iff the definition structurally equals
/// the snapshot taken at the last publish.
pub fn publish_status(flow: &Flow, last_published: Option<&FlowDefinition>) -> PublishStatus {
    if !flow.is_persisted() {
        return PublishStatus::Draft;
    }
    match last_published {
        Some(snapshot) if flow.definition.structurally_eq(snapshot) => PublishStatus::Published,
        _ => PublishStatus::Changed,
    }
}

/// Remembers the definition as of the last acknowledged publish.
#[derive(Debug, Clone, Default)]
pub struct PublishTracker {
    snapshot: Option<FlowDefinition>,
}

impl PublishTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flow loaded while active counts as published in its loaded state.
    pub fn on_loaded(&mut self, flow: &Flow) {
        self.snapshot = flow.is_active.then(|| flow.definition.clone());
    }

    /// Remember `definition` as the published snapshot after a successful publish.
    pub fn on_published(&mut self, definition: &FlowDefinition) {
        self.snapshot = Some(definition.clone());
    }

    pub fn snapshot(&self) -> Option<&FlowDefinition> {
        self.snapshot.as_ref()
    }

    /// Compare `flow` against the last published snapshot.
    pub fn status(&self, flow: &Flow) -> PublishStatus {
        publish_status(flow, self.snapshot.as_ref())
    }
}

/// Session facts the toolbar depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolbarInputs {
    pub status: PublishStatus,
    pub persisted: bool,
    pub placeholder_name: bool,
    /// A save, publish, or delete is in flight.
    pub busy: bool,
    /// A test run is submitted, polling, or waiting for a cancel acknowledgement.
    pub run_active: bool,
    /// The active run still accepts a cancel (not yet cancelling).
    pub run_cancellable: bool,
    pub deleted: bool,
}

/// Which toolbar actions are enabled. All `false` once the flow is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ToolbarState {
    pub can_save: bool,
    pub can_publish: bool,
    pub can_test: bool,
    pub can_cancel: bool,
    pub can_delete: bool,
    pub show_changed_badge: bool,
}

/// Derive the toolbar from session facts. Cancel is offered only while the run still accepts it.
pub fn project_toolbar(inputs: &ToolbarInputs) -> ToolbarState {
    if inputs.deleted {
        return ToolbarState::default();
    }
    ToolbarState {
        can_save: !inputs.busy && !inputs.placeholder_name,
        can_publish: inputs.persisted && !inputs.busy,
        can_test: !inputs.run_active,
        can_cancel: inputs.run_active && inputs.run_cancellable,
        can_delete: inputs.persisted,
        show_changed_badge: inputs.status == PublishStatus::Changed,
    }
}
