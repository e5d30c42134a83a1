//! Probe error types.

use thiserror::Error;

/// Errors from a single probe query.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("{command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("failed to decode {what}: {reason}")]
    Decode { what: String, reason: String },

    #[error("node {0} is unreachable")]
    Unreachable(String),

    #[error("{0} not reported by node")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Transport-level failure of an event subscription. The upgrade state
/// machine reads this as "the node dropped the connection".
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event stream interrupted: {0}")]
pub struct StreamError(pub String);
