use std::time::Duration;

use crate::errors::FlowStudioError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How test runs are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between status requests. The first request is sent immediately.
    pub interval: Duration,
    /// Give up after this long without a terminal status. `None` polls until cancelled.
    pub max_duration: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_duration: None,
        }
    }
}

impl PollPolicy {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn max_duration(mut self, max_duration: Option<Duration>) -> Self {
        self.max_duration = max_duration;
        self
    }
}

/// Configuration for the Flow Studio REST client.
#[derive(Clone, Debug)]
pub struct FlowStudioClientConfig {
    /// Base URL of the flow API, e.g. `https://ops.example.com/api`.
    pub base_url: String,
    /// Optional bearer token.
    pub api_token: Option<String>,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub poll: PollPolicy,
}

impl FlowStudioClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: None,
            timeout: DEFAULT_TIMEOUT,
            poll: PollPolicy::default(),
        }
    }

    /// Builds a config from `FLOW_STUDIO_*` environment variables.
    ///
    /// `FLOW_STUDIO_API_URL` is required; `FLOW_STUDIO_API_TOKEN`, `FLOW_STUDIO_HTTP_TIMEOUT_MS`,
    /// `FLOW_STUDIO_POLL_INTERVAL_MS` and `FLOW_STUDIO_MAX_POLL_MS` are optional.
    pub fn from_env() -> Result<Self, FlowStudioError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, FlowStudioError> {
        let base_url = lookup("FLOW_STUDIO_API_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(FlowStudioError::Config(
                "missing FLOW_STUDIO_API_URL for the flow API".into(),
            ));
        }
        let mut config = Self::new(base_url.trim());
        config.api_token = lookup("FLOW_STUDIO_API_TOKEN").filter(|t| !t.trim().is_empty());
        if let Some(ms) = parse_millis(&lookup, "FLOW_STUDIO_HTTP_TIMEOUT_MS")? {
            config.timeout = ms;
        }
        if let Some(ms) = parse_millis(&lookup, "FLOW_STUDIO_POLL_INTERVAL_MS")? {
            config.poll.interval = ms;
        }
        config.poll.max_duration = parse_millis(&lookup, "FLOW_STUDIO_MAX_POLL_MS")?;
        config.validate()?;
        Ok(config)
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Reject zero intervals and timeouts before any client is built.
    pub fn validate(&self) -> Result<(), FlowStudioError> {
        if self.poll.interval.is_zero() {
            return Err(FlowStudioError::Config(
                "poll interval must be greater than 0".into(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(FlowStudioError::Config(
                "HTTP timeout must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

fn parse_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<Duration>, FlowStudioError> {
    let Some(raw) = lookup(key).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|ms| Some(Duration::from_millis(ms)))
        .map_err(|_| FlowStudioError::Config(format!("{key} must be a number of milliseconds")))
}
