//! The narrow interface the orchestrator uses to talk to nodes.
//!
//! Every method is a single query. Waiting, deadlines and cancellation
//! are layered on top by the caller.

use std::future::Future;
use std::pin::Pin;

use noderoll_core::{ClusterMember, ExtensionInfo, HardwareInfo};
use tokio::sync::mpsc;

use crate::error::{ProbeResult, StreamError};
use crate::events::EventPayload;

pub type ProbeFuture<'a, T> = Pin<Box<dyn Future<Output = ProbeResult<T>> + Send + 'a>>;

/// Receiving end of an event subscription. The producer may outlive the
/// consumer; dropping the receiver is how a subscription is abandoned.
pub type EventStream = mpsc::Receiver<Result<EventPayload, StreamError>>;

/// Where an event subscription starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    /// Only events produced after subscribing.
    New,
    /// Replay up to this many recent events first.
    Recent(usize),
}

/// State of one system service on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceState {
    pub id: String,
    pub running: bool,
    pub healthy: bool,
    /// The service has no health check or has not reported yet.
    pub health_unknown: bool,
}

/// A control-plane process managed directly by the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticWorkload {
    pub id: String,
    pub phase: String,
    /// `Ready` condition reported `True`.
    pub ready: bool,
}

pub trait NodeStateProbe: Send + Sync {
    fn is_reachable<'a>(&'a self, address: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

    /// Running OS version with any leading `v` removed.
    fn version<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, String>;

    fn extensions<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, Vec<ExtensionInfo>>;

    fn kernel_cmdline<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, String>;

    /// Issue the upgrade command. Returns once the node accepted it.
    fn upgrade<'a>(&'a self, address: &'a str, image: &'a str, preserve: bool) -> ProbeFuture<'a, ()>;

    fn watch_upgrade<'a>(&'a self, address: &'a str, tail: Tail) -> ProbeFuture<'a, EventStream>;

    fn service_states<'a>(
        &'a self,
        address: &'a str,
        names: &'a [&'a str],
    ) -> ProbeFuture<'a, Vec<ServiceState>>;

    fn static_workloads<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, Vec<StaticWorkload>>;

    /// Node readiness from the cluster API. `None` when no cluster API is
    /// configured.
    fn node_ready<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, Option<bool>>;

    fn cluster_members(&self) -> ProbeFuture<'_, Vec<ClusterMember>>;

    fn hardware_info<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, HardwareInfo>;
}
