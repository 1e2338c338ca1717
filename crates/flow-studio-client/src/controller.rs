//! Test execution: submit a run, follow its status, cancel on request.
//!
//! Each run is driven by one spawned task. Its phase lives in a `watch` channel so callers can
//! observe it, and every transition goes through `send_if_modified` with the expected source
//! phase, so a cancel and a status update racing each other cannot both win.

use std::sync::Arc;

use flow_studio_core::payload::validate_input;
use flow_studio_core::validate::validate_for_test;
use flow_studio_core::{FlowDefinition, FlowId, NodeId, ValidationError, ValidationErrorKind};
use futures::StreamExt as _;
use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::api::FlowApi;
use crate::console::{ConsoleEntry, ExecutionConsole, LogLevel};
use crate::errors::FlowStudioError;
use crate::status_source::RunStatusSource;
use crate::wire::{NodeTestRequest, RunKey, RunSnapshot, RunStatus, TestFlowRequest};

/// Lifecycle of one test invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum TestPhase {
    Idle,
    /// Submission sent; the engine has not returned a run id yet.
    Submitted,
    Polling {
        key: RunKey,
    },
    /// Cancel sent; waiting for the engine to acknowledge.
    Cancelling {
        key: RunKey,
    },
    Completed {
        key: RunKey,
        result: Option<Value>,
    },
    Failed {
        key: Option<RunKey>,
        message: String,
    },
    Terminated {
        key: RunKey,
    },
    /// `key` is `None` when the run was cancelled before the engine assigned an id.
    Cancelled {
        key: Option<RunKey>,
    },
}

impl TestPhase {
    /// The run is over and the phase will not change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TestPhase::Completed { .. }
                | TestPhase::Failed { .. }
                | TestPhase::Terminated { .. }
                | TestPhase::Cancelled { .. }
        )
    }

    /// A run is in flight, including while a cancel awaits its acknowledgement.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TestPhase::Submitted | TestPhase::Polling { .. } | TestPhase::Cancelling { .. }
        )
    }

    /// Phases in which [`TestRunHandle::cancel`] has an effect.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, TestPhase::Submitted | TestPhase::Polling { .. })
    }

    /// Server run key, once submission returned one.
    pub fn key(&self) -> Option<&RunKey> {
        match self {
            TestPhase::Polling { key }
            | TestPhase::Cancelling { key }
            | TestPhase::Completed { key, .. }
            | TestPhase::Terminated { key } => Some(key),
            TestPhase::Failed { key, .. } | TestPhase::Cancelled { key } => key.as_ref(),
            TestPhase::Idle | TestPhase::Submitted => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TestPhase::Idle => "idle",
            TestPhase::Submitted => "submitted",
            TestPhase::Polling { .. } => "polling",
            TestPhase::Cancelling { .. } => "cancelling",
            TestPhase::Completed { .. } => "completed",
            TestPhase::Failed { .. } => "failed",
            TestPhase::Terminated { .. } => "terminated",
            TestPhase::Cancelled { .. } => "cancelled",
        }
    }

    fn from_terminal(key: RunKey, snapshot: &RunSnapshot) -> Option<Self> {
        match snapshot.status {
            RunStatus::Completed => Some(TestPhase::Completed {
                key,
                result: snapshot.result.clone(),
            }),
            RunStatus::Failed => Some(TestPhase::Failed {
                message: failure_message(snapshot),
                key: Some(key),
            }),
            RunStatus::Terminated => Some(TestPhase::Terminated { key }),
            _ => None,
        }
    }
}

fn failure_message(snapshot: &RunSnapshot) -> String {
    snapshot
        .result
        .as_ref()
        .and_then(|r| {
            r.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .or_else(|| r.get("message"))
        })
        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
        .unwrap_or_else(|| "run failed".to_string())
}

/// What to run.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRequest {
    pub definition: FlowDefinition,
    pub flow_id: Option<FlowId>,
    pub input: Option<Value>,
    /// Node that receives status annotations; usually the selected node or the trigger.
    pub focus: Option<NodeId>,
}

impl TestRequest {
    pub fn new(definition: FlowDefinition) -> Self {
        Self {
            definition,
            flow_id: None,
            input: None,
            focus: None,
        }
    }

    /// Check the graph and, for an API trigger with a declared schema, the input.
    fn prepare(self) -> Result<(TestFlowRequest, Option<NodeId>), ValidationError> {
        validate_for_test(&self.definition)?;
        let schema = self
            .definition
            .trigger()
            .and_then(|trigger| trigger.config().input_schema());
        let input = match (schema, self.input) {
            (Some(schema), input) => {
                let input = input.unwrap_or_else(|| json!({}));
                validate_input(schema, &input)?;
                Some(input)
            }
            (None, Some(input)) if !input.is_object() => {
                return Err(ValidationError::new(
                    ValidationErrorKind::InvalidTestInput,
                    "test input must be a JSON object",
                ));
            }
            (None, input) => input,
        };
        let focus = self
            .focus
            .filter(|id| self.definition.contains_node(id))
            .or_else(|| self.definition.trigger().map(|t| t.id().clone()));
        Ok((
            TestFlowRequest {
                flow_definition: self.definition,
                flow_id: self.flow_id,
                input,
            },
            focus,
        ))
    }
}

/// A status change for the node believed to be executing.
#[derive(Debug, Clone, PartialEq)]
pub struct RunUpdate {
    pub key: RunKey,
    pub node_id: NodeId,
    pub snapshot: RunSnapshot,
}

impl RunUpdate {
    /// Value stored as the node's `lastRunResult`.
    pub fn annotation(&self) -> Value {
        json!({
            "workflowId": self.key.workflow_id,
            "runId": self.key.run_id,
            "status": self.snapshot.status,
            "result": self.snapshot.result,
        })
    }
}

struct RunShared {
    phase: watch::Sender<TestPhase>,
    abort: watch::Sender<bool>,
}

/// Handle to one test run.
#[derive(Clone)]
pub struct TestRunHandle {
    shared: Arc<RunShared>,
}

impl TestRunHandle {
    pub fn phase(&self) -> TestPhase {
        self.shared.phase.borrow().clone()
    }

    pub fn key(&self) -> Option<RunKey> {
        self.shared.phase.borrow().key().cloned()
    }

    /// Watch phase changes. The current phase is marked seen.
    pub fn subscribe(&self) -> watch::Receiver<TestPhase> {
        self.shared.phase.subscribe()
    }

    /// Stop following the run. Returns `false` when the run already finished.
    ///
    /// Before a run id exists the run is cancelled locally at once and cancelled remotely when
    /// the submission returns. With a run id, polling stops immediately and the phase stays
    /// `Cancelling` until the engine acknowledges.
    pub fn cancel(&self) -> bool {
        let mut initiated = false;
        self.shared.phase.send_if_modified(|phase| match phase {
            TestPhase::Submitted => {
                *phase = TestPhase::Cancelled { key: None };
                initiated = true;
                true
            }
            TestPhase::Polling { key } => {
                *phase = TestPhase::Cancelling { key: key.clone() };
                initiated = true;
                true
            }
            _ => false,
        });
        if initiated {
            self.shared.abort.send_replace(true);
        }
        initiated
    }

    /// Wait for a terminal phase.
    pub async fn wait(&self) -> TestPhase {
        let mut rx = self.shared.phase.subscribe();
        match rx.wait_for(TestPhase::is_terminal).await {
            Ok(phase) => phase.clone(),
            Err(_) => self.phase(),
        }
    }
}

/// Starts and tracks test runs for one flow session.
pub struct TestExecutionController {
    api: Arc<dyn FlowApi>,
    source: Arc<dyn RunStatusSource>,
    console: ExecutionConsole,
    updates_tx: mpsc::UnboundedSender<RunUpdate>,
    updates_rx: mpsc::UnboundedReceiver<RunUpdate>,
    current: Option<TestRunHandle>,
}

impl TestExecutionController {
    pub fn new(
        api: Arc<dyn FlowApi>,
        source: Arc<dyn RunStatusSource>,
        console: ExecutionConsole,
    ) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            api,
            source,
            console,
            updates_tx,
            updates_rx,
            current: None,
        }
    }

    pub fn console(&self) -> &ExecutionConsole {
        &self.console
    }

    /// The most recent run, kept after it finishes until [`reset`](Self::reset).
    pub fn current(&self) -> Option<&TestRunHandle> {
        self.current.as_ref()
    }

    pub fn phase(&self) -> TestPhase {
        self.current
            .as_ref()
            .map_or(TestPhase::Idle, TestRunHandle::phase)
    }

    pub fn is_active(&self) -> bool {
        self.phase().is_active()
    }

    /// Validate and submit a run. Rejected while another run is active.
    pub fn start(&mut self, request: TestRequest) -> Result<TestRunHandle, FlowStudioError> {
        if self.is_active() {
            return Err(ValidationError::new(
                ValidationErrorKind::RunActive,
                "a test run is already in progress",
            )
            .into());
        }
        let (request, focus) = request.prepare()?;
        self.discard_pending_updates();

        let (phase_tx, _) = watch::channel(TestPhase::Submitted);
        let (abort_tx, abort_rx) = watch::channel(false);
        let handle = TestRunHandle {
            shared: Arc::new(RunShared {
                phase: phase_tx,
                abort: abort_tx,
            }),
        };
        let ctx = RunContext {
            api: self.api.clone(),
            source: self.source.clone(),
            console: self.console.clone(),
            updates: self.updates_tx.clone(),
            shared: handle.shared.clone(),
            focus,
        };
        info!(
            event = "test_run.submitted",
            domain = "test_run",
            nodes = request.flow_definition.nodes().len() as u64
        );
        tokio::spawn(run_task(ctx, request, abort_rx));
        self.current = Some(handle.clone());
        Ok(handle)
    }

    /// Cancel the current run, if any.
    pub fn cancel(&self) -> bool {
        self.current.as_ref().is_some_and(TestRunHandle::cancel)
    }

    /// Pending node updates for the current run. Updates from superseded or cancelled runs are
    /// dropped.
    ///
    /// Call this after each phase change and once more after the run ends. Anything left
    /// undrained is discarded by the next [`start`](Self::start) or [`reset`](Self::reset).
    pub fn drain_updates(&mut self) -> Vec<RunUpdate> {
        let phase = self.phase();
        let accepted_key = match &phase {
            TestPhase::Cancelling { .. } | TestPhase::Cancelled { .. } => None,
            other => other.key(),
        };
        let mut accepted = Vec::new();
        while let Ok(update) = self.updates_rx.try_recv() {
            if accepted_key == Some(&update.key) {
                accepted.push(update);
            } else {
                debug!(event = "test_run.update_discarded", domain = "test_run", run = %update.key);
            }
        }
        accepted
    }

    /// Number of updates queued and not yet drained.
    pub fn pending_updates(&self) -> usize {
        self.updates_rx.len()
    }

    fn discard_pending_updates(&mut self) {
        let mut discarded = 0u64;
        while self.updates_rx.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(event = "test_run.updates_discarded", domain = "test_run", count = discarded);
        }
    }

    /// Forget a finished run and clear the console.
    pub fn reset(&mut self) {
        if !self.is_active() {
            self.current = None;
            self.discard_pending_updates();
        }
        self.console.clear();
    }

    /// Single-step dry run through `POST /test/node`.
    pub async fn test_node(&self, request: &NodeTestRequest) -> Result<Value, FlowStudioError> {
        self.console
            .info(format!("Testing {} step", request.kind));
        match self.api.test_node(request).await {
            Ok(result) => {
                self.console.push(
                    ConsoleEntry::new(LogLevel::Success, format!("{} step test finished", request.kind))
                        .with_data(Some(result.clone())),
                );
                Ok(result)
            }
            Err(err) => {
                self.console
                    .error(format!("{} step test failed: {}", request.kind, err.user_message()));
                Err(err)
            }
        }
    }
}

struct RunContext {
    api: Arc<dyn FlowApi>,
    source: Arc<dyn RunStatusSource>,
    console: ExecutionConsole,
    updates: mpsc::UnboundedSender<RunUpdate>,
    shared: Arc<RunShared>,
    focus: Option<NodeId>,
}

impl RunContext {
    /// Move from a phase accepted by `from` to `to`. Returns whether the transition happened.
    fn transition(&self, from: impl Fn(&TestPhase) -> bool, to: TestPhase) -> bool {
        let name = to.name();
        let mut next = Some(to);
        let changed = self.shared.phase.send_if_modified(|phase| {
            if !from(phase) {
                return false;
            }
            match next.take() {
                Some(to) => {
                    *phase = to;
                    true
                }
                None => false,
            }
        });
        if changed {
            debug!(event = "test_run.phase", domain = "test_run", phase = name);
        }
        changed
    }

    fn forward(&self, key: &RunKey, snapshot: &RunSnapshot) {
        let level = match snapshot.status {
            RunStatus::Completed => LogLevel::Success,
            RunStatus::Failed => LogLevel::Error,
            RunStatus::Terminated => LogLevel::Warn,
            _ => LogLevel::Info,
        };
        self.console.push(
            ConsoleEntry::new(level, format!("Run {} is {}", key.run_id, snapshot.status))
                .with_run(key.clone())
                .with_node(self.focus.clone())
                .with_data(snapshot.result.clone()),
        );
        if let Some(node_id) = &self.focus {
            let _ = self.updates.send(RunUpdate {
                key: key.clone(),
                node_id: node_id.clone(),
                snapshot: snapshot.clone(),
            });
        }
    }

    async fn cancel_remote(&self, key: &RunKey) {
        self.console
            .push(ConsoleEntry::new(LogLevel::Info, "Cancelling test run").with_run(key.clone()));
        let is_cancelling = |p: &TestPhase| matches!(p, TestPhase::Cancelling { .. });
        match self.api.cancel_test(key).await {
            Ok(ack) => {
                // A completion or failure reported by the engine wins over the cancel.
                let reported = ack
                    .status
                    .filter(|s| matches!(s, RunStatus::Completed | RunStatus::Failed))
                    .map(|status| RunSnapshot {
                        status,
                        result: None,
                    })
                    .and_then(|s| TestPhase::from_terminal(key.clone(), &s));
                let final_phase = reported.unwrap_or(TestPhase::Cancelled {
                    key: Some(key.clone()),
                });
                info!(
                    event = "test_run.cancelled",
                    domain = "test_run",
                    run = %key,
                    phase = final_phase.name()
                );
                let message = match final_phase {
                    TestPhase::Cancelled { .. } => "Test run cancelled".to_string(),
                    ref other => format!("Run {} before the cancel took effect", other.name()),
                };
                self.console
                    .push(ConsoleEntry::new(LogLevel::Warn, message).with_run(key.clone()));
                self.transition(is_cancelling, final_phase);
            }
            Err(err) => {
                warn!(event = "test_run.cancel_failed", domain = "test_run", run = %key, error = %err);
                self.console.push(
                    ConsoleEntry::new(LogLevel::Error, format!("Cancel failed: {}", err.user_message()))
                        .with_run(key.clone()),
                );
                self.transition(
                    is_cancelling,
                    TestPhase::Failed {
                        key: Some(key.clone()),
                        message: format!("cancel was not acknowledged: {err}"),
                    },
                );
            }
        }
    }
}

async fn run_task(ctx: RunContext, request: TestFlowRequest, mut abort_rx: watch::Receiver<bool>) {
    ctx.console.info("Submitting test run");
    let key = match ctx.api.submit_test(&request).await {
        Ok(key) => key,
        Err(err) => {
            warn!(event = "test_run.submit_failed", domain = "test_run", error = %err);
            ctx.console
                .error(format!("Test run could not be started: {}", err.user_message()));
            ctx.transition(
                |p| matches!(p, TestPhase::Submitted),
                TestPhase::Failed {
                    key: None,
                    message: err.to_string(),
                },
            );
            return;
        }
    };

    let started = ctx.transition(
        |p| matches!(p, TestPhase::Submitted),
        TestPhase::Polling { key: key.clone() },
    );
    if !started {
        // Cancelled while the submission was in flight: the run exists remotely but is never
        // polled.
        info!(event = "test_run.cancel_after_submit", domain = "test_run", run = %key);
        if let Err(err) = ctx.api.cancel_test(&key).await {
            warn!(event = "test_run.cancel_failed", domain = "test_run", run = %key, error = %err);
        }
        ctx.console
            .push(ConsoleEntry::new(LogLevel::Warn, "Test run cancelled").with_run(key));
        return;
    }
    ctx.console.push(
        ConsoleEntry::new(LogLevel::Info, format!("Test run {} started", key.run_id))
            .with_run(key.clone()),
    );

    let mut statuses = ctx.source.subscribe(key.clone());
    let mut last: Option<RunSnapshot> = None;
    loop {
        tokio::select! {
            biased;
            changed = abort_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let aborted = *abort_rx.borrow_and_update();
                if aborted {
                    drop(statuses);
                    ctx.cancel_remote(&key).await;
                    return;
                }
            }
            next = statuses.next() => {
                match next {
                    Some(Ok(snapshot)) => {
                        if last.as_ref() != Some(&snapshot) {
                            ctx.forward(&key, &snapshot);
                            last = Some(snapshot.clone());
                        }
                        if let Some(done) = TestPhase::from_terminal(key.clone(), &snapshot) {
                            info!(
                                event = "test_run.finished",
                                domain = "test_run",
                                run = %key,
                                status = %snapshot.status
                            );
                            ctx.transition(
                                |p| matches!(p, TestPhase::Polling { .. } | TestPhase::Cancelling { .. }),
                                done,
                            );
                            return;
                        }
                    }
                    Some(Err(err @ FlowStudioError::PollTimeout { .. })) => {
                        warn!(event = "test_run.poll_timeout", domain = "test_run", run = %key);
                        ctx.console.push(
                            ConsoleEntry::new(LogLevel::Error, err.user_message()).with_run(key.clone()),
                        );
                        ctx.transition(
                            |p| matches!(p, TestPhase::Polling { .. }),
                            TestPhase::Failed { key: Some(key.clone()), message: err.to_string() },
                        );
                        return;
                    }
                    Some(Err(err)) => {
                        warn!(event = "test_run.poll_failed", domain = "test_run", run = %key, error = %err);
                        ctx.console.push(
                            ConsoleEntry::new(LogLevel::Warn, format!("Status check failed: {err}"))
                                .with_run(key.clone()),
                        );
                    }
                    None => {
                        ctx.transition(
                            |p| matches!(p, TestPhase::Polling { .. }),
                            TestPhase::Failed {
                                key: Some(key.clone()),
                                message: "status stream ended without a terminal status".into(),
                            },
                        );
                        return;
                    }
                }
            }
        }
    }
}
