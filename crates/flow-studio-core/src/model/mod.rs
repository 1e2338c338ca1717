mod config;
mod definition;
mod flow;
mod ids;
mod naming;
mod node;

pub use config::{
    ApiCallConfig, ApiTriggerConfig, FieldMapping, FilterConfig, HttpMethod, HumanTaskConfig,
    ManualTriggerConfig, MapConfig, NodeConfig, NodeKind, ScheduleTriggerConfig, SwitchCase,
    SwitchConfig, UnknownNodeKind,
};
pub use definition::{Edge, FlowDefinition, Viewport};
pub use flow::Flow;
pub use ids::{EdgeId, FlowId, NodeId};
pub use naming::{PLACEHOLDER_NAME, next_default_label, slugify, untitled_suffix};
pub use node::{Node, Position};
