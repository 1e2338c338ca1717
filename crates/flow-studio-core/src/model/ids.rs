use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

opaque_id!(
    /// Opaque node id, unique within one flow. Loaded flows keep whatever ids the server stored.
    NodeId
);
opaque_id!(
    /// Opaque edge id.
    EdgeId
);
opaque_id!(
    /// Server-assigned flow id. Absent until the first successful save.
    FlowId
);

impl NodeId {
    /// Fresh id for a node created in the editor.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl EdgeId {
    pub fn generate() -> Self {
        Self(format!("e-{}", Uuid::new_v4()))
    }
}
