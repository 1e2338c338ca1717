//! Structural rules checked before a graph mutation, a save, or a test submission.

use tracing::debug;

use crate::errors::{ValidationError, ValidationErrorKind};
use crate::graph;
use crate::model::{Flow, FlowDefinition, NodeId, NodeKind, PLACEHOLDER_NAME};

/// Options for save-time validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveRules {
    /// Accept nodes that the trigger cannot reach.
    pub allow_orphans: bool,
}

impl SaveRules {
    pub fn allow_orphans() -> Self {
        Self {
            allow_orphans: true,
        }
    }
}

/// Trigger cardinality: an empty graph accepts only a trigger, a non-empty one no second trigger.
pub fn check_node_insertion(def: &FlowDefinition, kind: NodeKind) -> Result<(), ValidationError> {
    let has_trigger = def.trigger().is_some();
    let err = if def.is_empty() && !kind.is_trigger() {
        Some(format!("the first step must be a trigger, not {kind}"))
    } else if kind.is_trigger() && has_trigger {
        Some("a flow can only have one trigger".to_string())
    } else {
        None
    };
    match err {
        Some(message) => {
            debug!(
                event = "graph.node_rejected",
                domain = "graph",
                node_type = %kind,
                reason = %message
            );
            Err(ValidationError::new(
                ValidationErrorKind::TriggerCardinality,
                message,
            ))
        }
        None => Ok(()),
    }
}

/// Edge rules: endpoints exist, no self-loop, nothing flows into a trigger, no duplicates.
pub fn check_edge(
    def: &FlowDefinition,
    source: &NodeId,
    target: &NodeId,
    source_handle: Option<&str>,
) -> Result<(), ValidationError> {
    if !def.contains_node(source) {
        return Err(ValidationError::unknown_node(source));
    }
    let Some(target_node) = def.node(target) else {
        return Err(ValidationError::unknown_node(target));
    };
    if source == target {
        return Err(ValidationError::new(
            ValidationErrorKind::SelfLoop,
            format!("node {source} cannot connect to itself"),
        )
        .with_node(source.clone()));
    }
    if target_node.is_trigger() {
        return Err(ValidationError::new(
            ValidationErrorKind::TriggerIncomingEdge,
            "a trigger cannot have incoming connections",
        )
        .with_node(target.clone()));
    }
    let duplicate = def.edges().iter().any(|e| {
        &e.source == source && &e.target == target && e.source_handle.as_deref() == source_handle
    });
    if duplicate {
        return Err(ValidationError::new(
            ValidationErrorKind::DuplicateEdge,
            format!("{source} is already connected to {target}"),
        )
        .with_node(source.clone()));
    }
    Ok(())
}

/// Every edge endpoint names an existing node.
fn check_edge_endpoints(def: &FlowDefinition) -> Result<(), ValidationError> {
    for edge in def.edges() {
        for end in [&edge.source, &edge.target] {
            if !def.contains_node(end) {
                return Err(ValidationError::unknown_node(end));
            }
        }
    }
    Ok(())
}

/// Rules that gate persistence: exactly one trigger, a terminal step, no dangling edges, and
/// (unless allowed) no orphan nodes.
pub fn validate_for_save(def: &FlowDefinition, rules: SaveRules) -> Result<(), ValidationError> {
    let mut triggers = def.triggers();
    let Some(trigger) = triggers.next() else {
        return Err(ValidationError::new(
            ValidationErrorKind::MissingTrigger,
            "add a trigger before saving",
        ));
    };
    if let Some(extra) = triggers.next() {
        return Err(ValidationError::new(
            ValidationErrorKind::TriggerCardinality,
            "a flow can only have one trigger",
        )
        .with_node(extra.id().clone()));
    }
    check_edge_endpoints(def)?;

    let terminal = graph::sinks(def)
        .into_iter()
        .filter_map(|id| def.node(id))
        .any(|n| !n.is_trigger());
    if !terminal {
        return Err(ValidationError::new(
            ValidationErrorKind::NoTerminalNode,
            "the flow needs at least one step after the trigger that ends it",
        ));
    }

    if !rules.allow_orphans
        && let Some(orphan) = graph::unreachable_from(def, trigger.id()).first()
    {
        let label = def.node(orphan).map(|n| n.label()).unwrap_or_default();
        return Err(ValidationError::new(
            ValidationErrorKind::OrphanNode,
            format!("step \"{label}\" is not connected to the trigger"),
        )
        .with_node((*orphan).clone()));
    }
    Ok(())
}

/// Looser rules for ad-hoc test runs: a trigger and no dangling edges.
pub fn validate_for_test(def: &FlowDefinition) -> Result<(), ValidationError> {
    if def.trigger().is_none() {
        return Err(ValidationError::new(
            ValidationErrorKind::MissingTrigger,
            "add a trigger before running a test",
        ));
    }
    check_edge_endpoints(def)
}

/// A flow must carry a real name (not empty, not the placeholder) before it is persisted.
pub fn validate_flow_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed == PLACEHOLDER_NAME {
        return Err(ValidationError::new(
            ValidationErrorKind::PlaceholderName,
            "Please give your flow a name before saving.",
        ));
    }
    Ok(())
}

/// Name and graph checks run before a save reaches the network.
pub fn validate_flow_for_save(flow: &Flow, rules: SaveRules) -> Result<(), ValidationError> {
    validate_flow_name(&flow.name)?;
    validate_for_save(&flow.definition, rules)
}
