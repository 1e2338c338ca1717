//! Flow Studio core: the action-flow graph model, its structural rules, editor operations, test
//! payload editing, and publish status projection. No I/O; the HTTP side lives in
//! `flow-studio-client`.

pub mod editor;
pub mod errors;
pub mod graph;
pub mod model;
pub mod observability;
pub mod payload;
pub mod status;
pub mod validate;

pub use editor::{DropToken, FlowEditor};
pub use errors::{ValidationError, ValidationErrorKind};
pub use model::{
    Edge, EdgeId, Flow, FlowDefinition, FlowId, Node, NodeConfig, NodeId, NodeKind, Position,
    Viewport,
};
pub use observability::{LogOutput, ObservabilityConfig, init_observability, init_observability_with};
pub use payload::{InputSchema, PayloadEditor, PayloadMode};
pub use status::{
    PublishStatus, PublishTracker, ToolbarInputs, ToolbarState, project_toolbar, publish_status,
};
pub use validate::SaveRules;
