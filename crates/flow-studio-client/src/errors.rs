use flow_studio_core::ValidationError;

use crate::wire::RunKey;

/// User-visible text for a name collision on save or rename.
pub const CONFLICT_MESSAGE: &str = "A flow with this name already exists.";

/// Top-level error type for persistence and test execution.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowStudioError {
    /// Client-side rule violation; no request was sent.
    #[error(transparent)]
    Validation(ValidationError),
    /// Server rejected the flow name as already taken (HTTP 409).
    #[error("conflict: {message}")]
    Conflict { message: String },
    /// Network failure or unexpected HTTP status.
    #[error("transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },
    /// Server has no record of the resource (HTTP 404).
    #[error("not found: {resource}")]
    NotFound { resource: String },
    /// Response body did not have the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Polling gave up after the configured ceiling without a terminal status.
    #[error("run {key} did not finish before the polling limit")]
    PollTimeout { key: RunKey },
}

impl FlowStudioError {
    pub(crate) fn transport(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::Transport {
            message: message.into(),
            status,
        }
    }

    pub(crate) fn conflict() -> Self {
        Self::Conflict {
            message: CONFLICT_MESSAGE.to_string(),
        }
    }

    /// Notification text for the user.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(err) => err.message.clone(),
            Self::Conflict { message } => message.clone(),
            Self::Transport { .. } => "Something went wrong. Please try again.".to_string(),
            Self::NotFound { resource } => format!("{resource} could not be found."),
            Self::Protocol(_) => "The server sent an unexpected response.".to_string(),
            Self::Config(message) => message.clone(),
            Self::PollTimeout { .. } => {
                "The test run is taking too long; it is still running on the server.".to_string()
            }
        }
    }

    /// Whether repeating the same call (possibly after a rename) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::Transport { .. } | Self::PollTimeout { .. }
        )
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ValidationError> for FlowStudioError {
    fn from(value: ValidationError) -> Self {
        FlowStudioError::Validation(value)
    }
}
