//! Rollout error types.

use std::time::Duration;

use noderoll_core::Cancelled;
use thiserror::Error;

/// Why a single node's upgrade failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpgradeError {
    #[error("upgrade command failed: {0}")]
    CommandRejected(String),

    #[error("upgrade failed: {0}")]
    StreamFailure(String),

    #[error("timeout waiting for upgrade to complete on {address} after {after:?}")]
    Timeout { address: String, after: Duration },

    #[error("timeout waiting for node {address} to come back after reboot")]
    RebootTimeout { address: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for UpgradeError {
    fn from(_: Cancelled) -> Self {
        UpgradeError::Cancelled
    }
}

/// Errors that stop a rollout as a whole.
#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("no nodes found for target: {0}")]
    NoNodes(String),

    #[error("cluster discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("no profile detected for node {0}")]
    ProfileUndetected(String),

    #[error("node {address} references unknown profile {profile:?}")]
    UnknownProfile { address: String, profile: String },

    #[error("failed to get image for profile {profile}: {source}")]
    ImageResolution {
        profile: String,
        source: anyhow::Error,
    },

    #[error("aborted by operator")]
    Aborted,

    #[error("operation cancelled")]
    Cancelled,
}

impl From<Cancelled> for RolloutError {
    fn from(_: Cancelled) -> Self {
        RolloutError::Cancelled
    }
}

pub type RolloutResult<T> = Result<T, RolloutError>;
pub type UpgradeResult<T> = Result<T, UpgradeError>;
