//! Flow Studio client: REST transport, flow persistence, and test-run execution for a
//! [`FlowSession`].

pub mod api;
pub mod config;
pub mod console;
pub mod controller;
pub mod errors;
pub mod persistence;
pub mod session;
pub mod status_source;
pub mod wire;

#[cfg(test)]
mod testing;

pub use api::{FlowApi, HttpFlowApi};
pub use config::{FlowStudioClientConfig, PollPolicy};
pub use console::{ConsoleEntry, ExecutionConsole, LogLevel};
pub use controller::{RunUpdate, TestExecutionController, TestPhase, TestRequest, TestRunHandle};
pub use errors::{CONFLICT_MESSAGE, FlowStudioError};
pub use persistence::{FlowPersistence, SaveOutcome};
pub use session::{Backends, FlowSession};
pub use status_source::{PollingStatusSource, RunStatusSource, StatusStream};
pub use wire::{CancelAck, NodeTestRequest, RunKey, RunSnapshot, RunStatus, TestFlowRequest};
