//! Hooks for rendering a rollout as it happens.
//!
//! All methods default to no-ops. Progress records are delivered in order
//! and may repeat; suppressing repeats is the observer's business.

use noderoll_core::{Node, UpgradeProgress};
use noderoll_health::WaitError;

use crate::controller::NodeOutcome;
use crate::diff::{Decision, NodeFacts};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    Services,
    StaticWorkloads,
}

pub trait RolloutObserver: Send + Sync {
    fn plan(&self, _nodes: &[Node], _version: &str, _dry_run: bool) {}

    fn resolving_image(&self, _profile: &str) {}

    fn image_resolved(&self, _profile: &str, _image: &str) {}

    fn node_started(&self, _node: &Node, _index: usize, _total: usize) {}

    fn node_decision(&self, _node: &Node, _facts: &NodeFacts, _decision: &Decision, _image: &str) {}

    /// Dry run: the command that would have been issued.
    fn would_upgrade(&self, _node: &Node, _image: &str, _preserve: bool) {}

    fn progress(&self, _node: &Node, _progress: &UpgradeProgress) {}

    fn health_started(&self, _node: &Node, _check: HealthCheck) {}

    fn health_finished(&self, _node: &Node, _check: HealthCheck, _result: &Result<(), WaitError>) {}

    fn node_finished(&self, _node: &Node, _outcome: &NodeOutcome) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RolloutObserver for NoopObserver {}
