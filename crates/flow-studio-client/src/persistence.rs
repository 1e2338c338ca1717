use std::sync::Arc;

use flow_studio_core::validate::{self, SaveRules};
use flow_studio_core::{Flow, FlowId};
use tracing::info;

use crate::api::FlowApi;
use crate::errors::FlowStudioError;

/// Result of [`FlowPersistence::save`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// First save; the returned flow carries the server-assigned id.
    Created(Flow),
    Updated(Flow),
}

impl SaveOutcome {
    pub fn flow(&self) -> &Flow {
        match self {
            SaveOutcome::Created(flow) | SaveOutcome::Updated(flow) => flow,
        }
    }

    pub fn into_flow(self) -> Flow {
        match self {
            SaveOutcome::Created(flow) | SaveOutcome::Updated(flow) => flow,
        }
    }

    /// The save created the flow rather than updating it.
    pub fn is_created(&self) -> bool {
        matches!(self, SaveOutcome::Created(_))
    }
}

/// Maps flows onto the remote flow resource. Client-side checks run before any request.
#[derive(Clone)]
pub struct FlowPersistence {
    api: Arc<dyn FlowApi>,
    rules: SaveRules,
}

impl FlowPersistence {
    pub fn new(api: Arc<dyn FlowApi>) -> Self {
        Self {
            api,
            rules: SaveRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: SaveRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> SaveRules {
        self.rules
    }

    /// Name and graph checks that gate a save.
    pub fn check_save(&self, flow: &Flow) -> Result<(), FlowStudioError> {
        validate::validate_flow_for_save(flow, self.rules)?;
        Ok(())
    }

    /// Create the flow when it has no id, otherwise update it.
    pub async fn save(&self, flow: &Flow) -> Result<SaveOutcome, FlowStudioError> {
        self.check_save(flow)?;
        match flow.id() {
            None => {
                let created = self.api.create_flow(flow).await?;
                let Some(id) = created.id() else {
                    return Err(FlowStudioError::Protocol(
                        "create_flow response has no flow id".into(),
                    ));
                };
                info!(event = "flow.created", domain = "persistence", flow_id = %id);
                Ok(SaveOutcome::Created(created))
            }
            Some(id) => {
                let updated = self.api.update_flow(id, flow).await?;
                info!(event = "flow.updated", domain = "persistence", flow_id = %id);
                Ok(SaveOutcome::Updated(updated))
            }
        }
    }

    /// Fetch a stored flow by id.
    pub async fn load(&self, id: &FlowId) -> Result<Flow, FlowStudioError> {
        let flow = self.api.get_flow(id).await?;
        info!(
            event = "flow.loaded",
            domain = "persistence",
            flow_id = %id,
            nodes = flow.definition.nodes().len() as u64
        );
        Ok(flow)
    }

    /// Rename a stored flow: fetch, change the name, write back.
    pub async fn rename(&self, id: &FlowId, name: &str) -> Result<Flow, FlowStudioError> {
        validate::validate_flow_name(name)?;
        let mut flow = self.api.get_flow(id).await?;
        flow.name = name.trim().to_string();
        let renamed = self.api.update_flow(id, &flow).await?;
        info!(event = "flow.renamed", domain = "persistence", flow_id = %id);
        Ok(renamed)
    }

    /// Irreversible. Confirmation happens before this is called.
    pub async fn delete(&self, id: &FlowId) -> Result<(), FlowStudioError> {
        self.api.delete_flow(id).await?;
        info!(event = "flow.deleted", domain = "persistence", flow_id = %id);
        Ok(())
    }

    /// Activate the stored flow. Unsaved local edits are not sent.
    pub async fn publish(&self, id: &FlowId) -> Result<(), FlowStudioError> {
        self.api.publish_flow(id).await?;
        info!(event = "flow.published", domain = "persistence", flow_id = %id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeApi;
    use flow_studio_core::{FlowEditor, Position, ValidationErrorKind};

    fn named_flow(name: &str) -> Flow {
        let mut editor = FlowEditor::draft("org-1");
        editor.rename_flow(name);
        let trigger = editor
            .drop_node("trigger-manual", Position::default())
            .unwrap()
            .unwrap()
            .id()
            .clone();
        editor
            .drop_node_connected("human-task", Position::new(100.0, 0.0), &trigger)
            .unwrap();
        editor.into_flow()
    }

    #[tokio::test]
    async fn placeholder_name_never_reaches_the_network() {
        let api = Arc::new(FakeApi::default());
        let persistence = FlowPersistence::new(api.clone());
        let err = persistence.save(&named_flow("Untitled")).await.unwrap_err();
        assert!(matches!(
            err.validation().map(|v| v.kind),
            Some(ValidationErrorKind::PlaceholderName)
        ));
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test]
    async fn first_save_creates_then_updates() {
        let api = Arc::new(FakeApi::default());
        let persistence = FlowPersistence::new(api.clone());
        let mut flow = named_flow("Vendor onboarding");

        let created = persistence.save(&flow).await.unwrap();
        assert!(created.is_created());
        flow.id = created.flow().id.clone();

        let updated = persistence.save(&flow).await.unwrap();
        assert!(!updated.is_created());
        assert_eq!(updated.flow().id, flow.id);
    }

    #[tokio::test]
    async fn conflict_is_surfaced_with_its_message() {
        let api = Arc::new(FakeApi::default());
        api.fail_next(FlowStudioError::conflict());
        let persistence = FlowPersistence::new(api);
        let err = persistence.save(&named_flow("Duplicate")).await.unwrap_err();
        assert_eq!(err.user_message(), crate::errors::CONFLICT_MESSAGE);
    }

    #[tokio::test]
    async fn save_reload_round_trip_is_structurally_equal() {
        let api = Arc::new(FakeApi::default());
        let persistence = FlowPersistence::new(api);
        let flow = named_flow("Round trip");
        let created = persistence.save(&flow).await.unwrap().into_flow();
        let id = created.id.clone().unwrap();
        let reloaded = persistence.load(&id).await.unwrap();
        assert!(reloaded.definition.structurally_eq(&flow.definition));
    }

    #[tokio::test]
    async fn rename_validates_before_fetching() {
        let api = Arc::new(FakeApi::default());
        let persistence = FlowPersistence::new(api.clone());
        let id = persistence
            .save(&named_flow("Old name"))
            .await
            .unwrap()
            .into_flow()
            .id
            .unwrap();
        let calls = api.calls();
        assert!(persistence.rename(&id, "  ").await.is_err());
        assert_eq!(api.calls(), calls);
        let renamed = persistence.rename(&id, "New name").await.unwrap();
        assert_eq!(renamed.name, "New name");
    }

    #[tokio::test]
    async fn orphan_rules_follow_configuration() {
        let api = Arc::new(FakeApi::default());
        let mut flow = named_flow("With orphan");
        flow.definition
            .add_node(flow_studio_core::NodeKind::Filter, None, Position::default())
            .unwrap();
        let strict = FlowPersistence::new(api.clone());
        assert!(strict.save(&flow).await.is_err());
        let relaxed = FlowPersistence::new(api).with_rules(SaveRules::allow_orphans());
        assert!(relaxed.save(&flow).await.is_ok());
    }
}
