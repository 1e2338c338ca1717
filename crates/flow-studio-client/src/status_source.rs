//! Run status delivery. The controller only sees a stream of snapshots, so a push transport can
//! replace polling without touching it.

use std::sync::Arc;

use futures::StreamExt as _;
use futures::stream::{self, BoxStream};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::api::FlowApi;
use crate::config::PollPolicy;
use crate::errors::FlowStudioError;
use crate::wire::{RunKey, RunSnapshot};

pub type StatusStream = BoxStream<'static, Result<RunSnapshot, FlowStudioError>>;

/// Source of status snapshots for one run.
///
/// The stream ends after yielding a terminal snapshot. Errors are yielded as items; the stream
/// keeps going unless the error is [`FlowStudioError::PollTimeout`].
pub trait RunStatusSource: Send + Sync {
    fn subscribe(&self, key: RunKey) -> StatusStream;
}

/// Polls `GET /test/flow/{run_id}` on a fixed interval. The first request goes out immediately.
pub struct PollingStatusSource {
    api: Arc<dyn FlowApi>,
    policy: PollPolicy,
}

impl PollingStatusSource {
    pub fn new(api: Arc<dyn FlowApi>, policy: PollPolicy) -> Self {
        Self { api, policy }
    }
}

struct PollState {
    api: Arc<dyn FlowApi>,
    key: RunKey,
    policy: PollPolicy,
    ticker: Option<Interval>,
    deadline: Option<Instant>,
    done: bool,
}

impl RunStatusSource for PollingStatusSource {
    fn subscribe(&self, key: RunKey) -> StatusStream {
        let state = PollState {
            api: self.api.clone(),
            key,
            policy: self.policy,
            ticker: None,
            deadline: None,
            done: false,
        };
        stream::unfold(state, |mut state| async move {
            if state.done {
                return None;
            }
            let policy = state.policy;
            if state.ticker.is_none() {
                let mut ticker = tokio::time::interval(policy.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                state.ticker = Some(ticker);
                state.deadline = policy.max_duration.map(|max| Instant::now() + max);
            }
            loop {
                if let Some(ticker) = state.ticker.as_mut() {
                    ticker.tick().await;
                }
                if state.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    state.done = true;
                    let key = state.key.clone();
                    return Some((Err(FlowStudioError::PollTimeout { key }), state));
                }
                match state.api.test_status(&state.key).await {
                    Ok(Some(snapshot)) => {
                        state.done = snapshot.status.is_terminal();
                        return Some((Ok(snapshot), state));
                    }
                    Ok(None) | Err(FlowStudioError::NotFound { .. }) => {
                        debug!(event = "poll.pending", domain = "test_run", run = %state.key);
                    }
                    Err(err) => return Some((Err(err), state)),
                }
            }
        })
        .boxed()
    }
}
