//! In-memory probe with scripted per-node facts.
//!
//! Used by the unit and scenario tests of the crates above this one.
//! Every query is answered from the node's [`FakeNode`] and logged as a
//! [`Call`] so tests can assert on ordering.

use std::collections::{BTreeMap, VecDeque};
use std::future::ready;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use noderoll_core::{ClusterMember, ExtensionInfo, HardwareInfo};
use tokio::sync::mpsc;

use crate::error::{ProbeError, ProbeResult, StreamError};
use crate::events::{EventPayload, MachineStage};
use crate::probe::{
    EventStream, NodeStateProbe, ProbeFuture, ServiceState, StaticWorkload, Tail,
};

pub const CONTROL_PLANE_PODS: &[&str] = &[
    "kube-system/kube-apiserver-node",
    "kube-system/kube-controller-manager-node",
    "kube-system/kube-scheduler-node",
];

/// One scripted event subscription.
#[derive(Debug, Clone, Default)]
pub struct WatchScript {
    pub items: Vec<Result<EventPayload, StreamError>>,
    /// Keep the channel open after the items are delivered.
    pub hold_open: bool,
}

impl WatchScript {
    pub fn events(events: Vec<EventPayload>) -> Self {
        Self {
            items: events.into_iter().map(Ok).collect(),
            hold_open: false,
        }
    }

    /// Events followed by a transport error.
    pub fn dropped_after(events: Vec<EventPayload>) -> Self {
        let mut items: Vec<_> = events.into_iter().map(Ok).collect();
        items.push(Err(StreamError("connection reset by peer".into())));
        Self {
            items,
            hold_open: false,
        }
    }

    /// Events, then silence with the subscription left open.
    pub fn silent_after(events: Vec<EventPayload>) -> Self {
        Self {
            items: events.into_iter().map(Ok).collect(),
            hold_open: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FakeNode {
    pub version: String,
    pub version_error: Option<String>,
    pub extensions: Vec<String>,
    pub extensions_error: Option<String>,
    pub cmdline: String,
    pub cmdline_error: Option<String>,
    pub upgrade_error: Option<String>,
    /// Version reported after a successful upgrade command.
    pub upgraded_version: Option<String>,
    /// Extensions reported after a successful upgrade command.
    pub upgraded_extensions: Option<Vec<String>>,
    /// Number of reachability checks that report unreachable first.
    pub unreachable_polls: usize,
    pub watch_error: Option<String>,
    /// Scripts consumed one per `watch_upgrade`; when empty a single
    /// running event is delivered.
    pub watches: VecDeque<WatchScript>,
    /// `None` reports every requested service as running and healthy.
    pub services: Option<Vec<ServiceState>>,
    /// `None` reports the three control-plane pods as ready.
    pub workloads: Option<Vec<StaticWorkload>>,
    pub ready: Option<bool>,
    pub hardware: Option<HardwareInfo>,
}

impl FakeNode {
    pub fn at_version(version: &str) -> Self {
        Self {
            version: version.to_string(),
            version_error: None,
            extensions: Vec::new(),
            extensions_error: None,
            cmdline: "console=ttyS0 talos.platform=metal".to_string(),
            cmdline_error: None,
            upgrade_error: None,
            upgraded_version: None,
            upgraded_extensions: None,
            unreachable_polls: 0,
            watch_error: None,
            watches: VecDeque::new(),
            services: None,
            workloads: None,
            ready: None,
            hardware: None,
        }
    }

    pub fn with_extensions(mut self, names: &[&str]) -> Self {
        self.extensions = names.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_cmdline(mut self, cmdline: &str) -> Self {
        self.cmdline = cmdline.to_string();
        self
    }

    pub fn upgrades_to(mut self, version: &str) -> Self {
        self.upgraded_version = Some(version.to_string());
        self
    }

    pub fn with_watch(mut self, script: WatchScript) -> Self {
        self.watches.push_back(script);
        self
    }

    pub fn with_hardware(mut self, system: &str, processor: &str) -> Self {
        self.hardware = Some(HardwareInfo {
            system_manufacturer: system.to_string(),
            processor_manufacturer: processor.to_string(),
            ..Default::default()
        });
        self
    }
}

/// Every query the fake answered, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Reachable(String),
    Version(String),
    Extensions(String),
    Cmdline(String),
    Upgrade {
        address: String,
        image: String,
        preserve: bool,
    },
    Watch {
        address: String,
        tail: Tail,
    },
    Services(String),
    Workloads(String),
    NodeReady(String),
    Members,
    Hardware(String),
}

#[derive(Debug, Default)]
struct FakeState {
    nodes: BTreeMap<String, FakeNode>,
    members: Vec<ClusterMember>,
    members_error: Option<String>,
    calls: Vec<Call>,
    held: Vec<mpsc::Sender<Result<EventPayload, StreamError>>>,
}

#[derive(Debug, Default)]
pub struct FakeProbe {
    state: Mutex<FakeState>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(self, address: &str, node: FakeNode) -> Self {
        self.insert(address, node);
        self
    }

    pub fn with_member(self, member: ClusterMember) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.members.push(member);
        }
        self
    }

    pub fn fail_members(&self, reason: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.members_error = Some(reason.to_string());
        }
    }

    pub fn insert(&self, address: &str, node: FakeNode) {
        if let Ok(mut state) = self.state.lock() {
            state.nodes.insert(address.to_string(), node);
        }
    }

    /// Mutate a node's script in place.
    pub fn update(&self, address: &str, f: impl FnOnce(&mut FakeNode)) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(node) = state.nodes.get_mut(address) {
                f(node);
            }
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    /// Addresses that received an upgrade command, in order.
    pub fn upgraded(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Upgrade { address, .. } => Some(address),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn with<T>(
        &self,
        call: Call,
        address: &str,
        f: impl FnOnce(&mut FakeNode, &mut Vec<mpsc::Sender<Result<EventPayload, StreamError>>>) -> ProbeResult<T>,
    ) -> ProbeResult<T> {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| ProbeError::Other("fake probe poisoned".into()))?;
        let state = &mut *guard;
        state.calls.push(call);
        match state.nodes.get_mut(address) {
            Some(node) => f(node, &mut state.held),
            None => Err(ProbeError::Unreachable(address.to_string())),
        }
    }
}

fn scripted<T>(err: &Option<String>, ok: impl FnOnce() -> T) -> ProbeResult<T> {
    match err {
        Some(reason) => Err(ProbeError::Other(reason.clone())),
        None => Ok(ok()),
    }
}

fn open_watch(
    script: WatchScript,
    held: &mut Vec<mpsc::Sender<Result<EventPayload, StreamError>>>,
) -> EventStream {
    let (tx, rx) = mpsc::channel(script.items.len().max(1));
    for item in script.items {
        let _ = tx.try_send(item);
    }
    if script.hold_open {
        held.push(tx);
    }
    rx
}

impl NodeStateProbe for FakeProbe {
    fn is_reachable<'a>(&'a self, address: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        let res = self.with(Call::Reachable(address.into()), address, |node, _| {
            if node.unreachable_polls > 0 {
                node.unreachable_polls -= 1;
                return Ok(false);
            }
            Ok(true)
        });
        Box::pin(ready(res.unwrap_or(false)))
    }

    fn version<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, String> {
        let res = self.with(Call::Version(address.into()), address, |node, _| {
            scripted(&node.version_error, || node.version.clone())
        });
        Box::pin(ready(res))
    }

    fn extensions<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, Vec<ExtensionInfo>> {
        let res = self.with(Call::Extensions(address.into()), address, |node, _| {
            scripted(&node.extensions_error, || {
                node.extensions
                    .iter()
                    .map(|name| ExtensionInfo::named(name))
                    .collect()
            })
        });
        Box::pin(ready(res))
    }

    fn kernel_cmdline<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, String> {
        let res = self.with(Call::Cmdline(address.into()), address, |node, _| {
            scripted(&node.cmdline_error, || node.cmdline.clone())
        });
        Box::pin(ready(res))
    }

    fn upgrade<'a>(&'a self, address: &'a str, image: &'a str, preserve: bool) -> ProbeFuture<'a, ()> {
        let call = Call::Upgrade {
            address: address.into(),
            image: image.into(),
            preserve,
        };
        let res = self.with(call, address, |node, _| {
            if let Some(reason) = &node.upgrade_error {
                return Err(ProbeError::CommandFailed {
                    command: "upgrade".into(),
                    status: "exit status: 1".into(),
                    stderr: reason.clone(),
                });
            }
            if let Some(version) = node.upgraded_version.clone() {
                node.version = version;
            }
            if let Some(extensions) = node.upgraded_extensions.clone() {
                node.extensions = extensions;
            }
            Ok(())
        });
        Box::pin(ready(res))
    }

    fn watch_upgrade<'a>(&'a self, address: &'a str, tail: Tail) -> ProbeFuture<'a, EventStream> {
        let call = Call::Watch {
            address: address.into(),
            tail,
        };
        let res = self.with(call, address, |node, held| {
            if let Some(reason) = &node.watch_error {
                return Err(ProbeError::Other(reason.clone()));
            }
            let script = node
                .watches
                .pop_front()
                .unwrap_or_else(|| WatchScript::events(vec![EventPayload::stage(MachineStage::Running)]));
            Ok(open_watch(script, held))
        });
        Box::pin(ready(res))
    }

    fn service_states<'a>(
        &'a self,
        address: &'a str,
        names: &'a [&'a str],
    ) -> ProbeFuture<'a, Vec<ServiceState>> {
        let res = self.with(Call::Services(address.into()), address, |node, _| {
            Ok(node.services.clone().unwrap_or_else(|| {
                names
                    .iter()
                    .map(|name| ServiceState {
                        id: name.to_string(),
                        running: true,
                        healthy: true,
                        health_unknown: false,
                    })
                    .collect()
            }))
        });
        Box::pin(ready(res))
    }

    fn static_workloads<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, Vec<StaticWorkload>> {
        let res = self.with(Call::Workloads(address.into()), address, |node, _| {
            Ok(node.workloads.clone().unwrap_or_else(|| {
                CONTROL_PLANE_PODS
                    .iter()
                    .map(|id| StaticWorkload {
                        id: id.to_string(),
                        phase: "Running".into(),
                        ready: true,
                    })
                    .collect()
            }))
        });
        Box::pin(ready(res))
    }

    fn node_ready<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, Option<bool>> {
        let res = self.with(Call::NodeReady(address.into()), address, |node, _| Ok(node.ready));
        Box::pin(ready(res))
    }

    fn cluster_members(&self) -> ProbeFuture<'_, Vec<ClusterMember>> {
        let res = match self.state.lock() {
            Ok(mut state) => {
                state.calls.push(Call::Members);
                match &state.members_error {
                    Some(reason) => Err(ProbeError::Other(reason.clone())),
                    None => Ok(state.members.clone()),
                }
            }
            Err(_) => Err(ProbeError::Other("fake probe poisoned".into())),
        };
        Box::pin(ready(res))
    }

    fn hardware_info<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, HardwareInfo> {
        let res = self.with(Call::Hardware(address.into()), address, |node, _| {
            node.hardware
                .clone()
                .ok_or_else(|| ProbeError::NotFound("hardware information".into()))
        });
        Box::pin(ready(res))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upgrade_applies_scripted_version() {
        let probe = FakeProbe::new().with_node("10.0.0.1", FakeNode::at_version("1.9.5").upgrades_to("1.10.0"));
        assert_eq!(probe.version("10.0.0.1").await.unwrap(), "1.9.5");
        probe.upgrade("10.0.0.1", "img", true).await.unwrap();
        assert_eq!(probe.version("10.0.0.1").await.unwrap(), "1.10.0");
        assert_eq!(probe.upgraded(), vec!["10.0.0.1".to_string()]);
    }

    #[tokio::test]
    async fn unknown_node_is_unreachable() {
        let probe = FakeProbe::new();
        assert!(!probe.is_reachable("10.9.9.9").await);
        assert!(matches!(
            probe.version("10.9.9.9").await,
            Err(ProbeError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn reachability_countdown() {
        let mut node = FakeNode::at_version("1.9.5");
        node.unreachable_polls = 2;
        let probe = FakeProbe::new().with_node("n", node);
        assert!(!probe.is_reachable("n").await);
        assert!(!probe.is_reachable("n").await);
        assert!(probe.is_reachable("n").await);
    }

    #[tokio::test]
    async fn default_watch_reports_running() {
        let probe = FakeProbe::new().with_node("n", FakeNode::at_version("1.9.5"));
        let mut rx = probe.watch_upgrade("n", Tail::New).await.unwrap();
        assert!(rx.recv().await.unwrap().unwrap().is_running());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn held_watch_stays_open() {
        let probe = FakeProbe::new().with_node(
            "n",
            FakeNode::at_version("1.9.5").with_watch(WatchScript::silent_after(vec![])),
        );
        let mut rx = probe.watch_upgrade("n", Tail::Recent(10)).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert!(!rx.is_closed());
    }
}
