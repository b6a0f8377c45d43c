use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by the relay's operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("agent '{agent}' is unavailable: {reason}")]
    AgentUnavailable { agent: String, reason: String },

    #[error("a {0} is already in progress; wait for it to finish")]
    OverlayActive(&'static str),

    #[error("no agents are registered")]
    NoAgents,

    #[error("snapshot persistence failed: {0}")]
    Persistence(String),
}

/// Failures of a single generation attempt. Always absorbed into a System
/// message by the scheduler; never fatal.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no response within {}s", .0.as_secs_f64())]
    Timeout(Duration),
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        RelayError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Persistence(e.to_string())
    }
}
