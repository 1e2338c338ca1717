//! In-memory fakes shared by the unit tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use flow_studio_core::{Flow, FlowId};
use futures::StreamExt as _;
use futures::stream;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::api::FlowApi;
use crate::errors::FlowStudioError;
use crate::status_source::{RunStatusSource, StatusStream};
use crate::wire::{CancelAck, NodeTestRequest, RunKey, RunSnapshot, RunStatus, TestFlowRequest};

#[derive(Default)]
struct FakeState {
    calls: usize,
    fail_next: Option<FlowStudioError>,
    flows: BTreeMap<FlowId, Flow>,
    next_flow: u64,
    next_run: u64,
    statuses: VecDeque<Option<RunSnapshot>>,
    last_status: Option<RunSnapshot>,
    status_calls: usize,
    submitted: Vec<TestFlowRequest>,
    cancel_status: Option<RunStatus>,
    cancelled: Vec<RunKey>,
    node_tests: Vec<NodeTestRequest>,
    published: Vec<FlowId>,
    deleted: Vec<FlowId>,
}

/// [`FlowApi`] backed by a map of flows and a scripted run.
#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
    gated: AtomicBool,
    release: Notify,
}

impl FakeApi {
    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    /// Count the call and return the queued failure, if any.
    fn enter(&self) -> Result<(), FlowStudioError> {
        self.with_state(|s| {
            s.calls += 1;
            s.fail_next.take().map_or(Ok(()), Err)
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.with_state(|s| s.calls)
    }

    /// Fail the next call of any kind.
    pub(crate) fn fail_next(&self, err: FlowStudioError) {
        self.with_state(|s| s.fail_next = Some(err));
    }

    /// Replace the status script. Once it runs out the last entry repeats.
    pub(crate) fn script_statuses(&self, statuses: impl IntoIterator<Item = Option<RunSnapshot>>) {
        self.with_state(|s| {
            s.statuses = statuses.into_iter().collect();
            s.last_status = None;
        });
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.with_state(|s| s.status_calls)
    }

    /// Hold `submit_test` until [`FakeApi::release_submission`].
    pub(crate) fn gate_submissions(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release_submission(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.release.notify_one();
    }

    pub(crate) fn set_cancel_status(&self, status: Option<RunStatus>) {
        self.with_state(|s| s.cancel_status = status);
    }

    pub(crate) fn cancelled_runs(&self) -> Vec<RunKey> {
        self.with_state(|s| s.cancelled.clone())
    }

    pub(crate) fn submitted(&self) -> Vec<TestFlowRequest> {
        self.with_state(|s| s.submitted.clone())
    }

    pub(crate) fn node_tests(&self) -> Vec<NodeTestRequest> {
        self.with_state(|s| s.node_tests.clone())
    }

    pub(crate) fn published(&self) -> Vec<FlowId> {
        self.with_state(|s| s.published.clone())
    }

    pub(crate) fn deleted(&self) -> Vec<FlowId> {
        self.with_state(|s| s.deleted.clone())
    }

    pub(crate) fn stored(&self, id: &FlowId) -> Option<Flow> {
        self.with_state(|s| s.flows.get(id).cloned())
    }
}

#[async_trait::async_trait]
impl FlowApi for FakeApi {
    async fn get_flow(&self, id: &FlowId) -> Result<Flow, FlowStudioError> {
        self.enter()?;
        self.stored(id).ok_or_else(|| FlowStudioError::NotFound {
            resource: format!("flow {id}"),
        })
    }

    async fn create_flow(&self, flow: &Flow) -> Result<Flow, FlowStudioError> {
        self.enter()?;
        self.with_state(|s| {
            s.next_flow += 1;
            let id = FlowId::new(format!("f-{}", s.next_flow));
            let mut stored = flow.clone();
            stored.id = Some(id.clone());
            stored.slug = flow.effective_slug().into_owned();
            stored.name = flow.name.trim().to_string();
            s.flows.insert(id, stored.clone());
            Ok(stored)
        })
    }

    async fn update_flow(&self, id: &FlowId, flow: &Flow) -> Result<Flow, FlowStudioError> {
        self.enter()?;
        self.with_state(|s| {
            let Some(existing) = s.flows.get_mut(id) else {
                return Err(FlowStudioError::NotFound {
                    resource: format!("flow {id}"),
                });
            };
            let mut stored = flow.clone();
            stored.id = Some(id.clone());
            stored.slug = flow.effective_slug().into_owned();
            stored.is_active = existing.is_active;
            *existing = stored.clone();
            Ok(stored)
        })
    }

    async fn delete_flow(&self, id: &FlowId) -> Result<(), FlowStudioError> {
        self.enter()?;
        self.with_state(|s| {
            s.flows.remove(id);
            s.deleted.push(id.clone());
        });
        Ok(())
    }

    async fn publish_flow(&self, id: &FlowId) -> Result<(), FlowStudioError> {
        self.enter()?;
        self.with_state(|s| {
            if let Some(flow) = s.flows.get_mut(id) {
                flow.is_active = true;
            }
            s.published.push(id.clone());
        });
        Ok(())
    }

    async fn submit_test(&self, request: &TestFlowRequest) -> Result<RunKey, FlowStudioError> {
        self.enter()?;
        if self.gated.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        Ok(self.with_state(|s| {
            s.next_run += 1;
            s.submitted.push(request.clone());
            RunKey::new("wf-1", format!("run-{}", s.next_run))
        }))
    }

    async fn test_status(&self, _key: &RunKey) -> Result<Option<RunSnapshot>, FlowStudioError> {
        self.with_state(|s| s.status_calls += 1);
        self.enter()?;
        Ok(self.with_state(|s| match s.statuses.pop_front() {
            Some(next) => {
                if let Some(snapshot) = &next {
                    s.last_status = Some(snapshot.clone());
                }
                next
            }
            None => s.last_status.clone(),
        }))
    }

    async fn cancel_test(&self, key: &RunKey) -> Result<CancelAck, FlowStudioError> {
        self.enter()?;
        Ok(self.with_state(|s| {
            s.cancelled.push(key.clone());
            CancelAck {
                status: s.cancel_status.clone(),
            }
        }))
    }

    async fn test_node(&self, request: &NodeTestRequest) -> Result<Value, FlowStudioError> {
        self.enter()?;
        self.with_state(|s| s.node_tests.push(request.clone()));
        Ok(json!({ "output": request.input }))
    }
}

/// Yields a fixed list of snapshots, then ends.
pub(crate) struct ScriptedSource {
    snapshots: Vec<RunSnapshot>,
}

impl ScriptedSource {
    pub(crate) fn new(snapshots: Vec<RunSnapshot>) -> Self {
        Self { snapshots }
    }
}

impl RunStatusSource for ScriptedSource {
    fn subscribe(&self, _key: RunKey) -> StatusStream {
        stream::iter(self.snapshots.clone().into_iter().map(Ok)).boxed()
    }
}
