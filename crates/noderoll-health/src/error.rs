//! Health wait error types.

use std::time::Duration;

use noderoll_core::Cancelled;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },
}

impl From<Cancelled> for WaitError {
    fn from(_: Cancelled) -> Self {
        WaitError::Cancelled
    }
}

pub type WaitResult<T> = Result<T, WaitError>;
