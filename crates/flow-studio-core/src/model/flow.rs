use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::definition::FlowDefinition;
use super::ids::FlowId;
use super::naming::{PLACEHOLDER_NAME, slugify};

/// An action flow: metadata plus its graph.
///
/// `id` is absent until the first successful save; the server assigns it once. `is_active` only
/// becomes true through publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<FlowId>,
    pub org_id: String,
    #[serde(default)]
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub definition: FlowDefinition,
    #[serde(default)]
    pub variables_schema: Value,
    #[serde(default)]
    pub is_active: bool,
}

impl Flow {
    /// Unsaved draft with the placeholder name and an empty graph.
    pub fn draft(org_id: impl Into<String>) -> Self {
        Self {
            id: None,
            org_id: org_id.into(),
            slug: String::new(),
            name: PLACEHOLDER_NAME.to_string(),
            description: String::new(),
            definition: FlowDefinition::new(),
            variables_schema: Value::Object(Default::default()),
            is_active: false,
        }
    }

    pub fn id(&self) -> Option<&FlowId> {
        self.id.as_ref()
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    pub fn has_placeholder_name(&self) -> bool {
        let name = self.name.trim();
        name.is_empty() || name == PLACEHOLDER_NAME
    }

    /// Stored slug, or one derived from the name when none was set.
    pub fn effective_slug(&self) -> Cow<'_, str> {
        if self.slug.trim().is_empty() {
            Cow::Owned(slugify(&self.name))
        } else {
            Cow::Borrowed(&self.slug)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn draft_starts_unsaved_with_placeholder_name() {
        let flow = Flow::draft("org-1");
        assert!(!flow.is_persisted());
        assert!(flow.has_placeholder_name());
        assert!(!flow.is_active);
        assert!(flow.definition.is_empty());
    }

    #[test]
    fn slug_falls_back_to_name() {
        let mut flow = Flow::draft("org-1");
        flow.name = "Invoice Approval".into();
        assert_eq!(flow.effective_slug(), "invoice-approval");
        flow.slug = "custom".into();
        assert_eq!(flow.effective_slug(), "custom");
    }

    #[test]
    fn server_record_deserializes_with_defaults() {
        let flow: Flow = serde_json::from_value(json!({
            "id": "f-1",
            "org_id": "org-1",
            "name": "Nightly sync",
            "definition": { "nodes": [], "edges": [] },
            "is_active": true
        }))
        .unwrap();
        assert_eq!(flow.id, Some(FlowId::new("f-1")));
        assert!(flow.is_active);
        assert_eq!(flow.definition.viewport.zoom, 1.0);
    }
}
