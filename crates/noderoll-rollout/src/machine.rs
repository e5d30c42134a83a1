//! Per-node upgrade state machine.
//!
//! ```text
//!   Idle ─► CommandIssued ─► Streaming ──────────────► VerifyingHealth ─► Done
//!                │              │   ▲                        ▲
//!                │              ▼   │ (stream error)         │
//!                │          Reconnecting ────────────────────┘
//!                ▼              │
//!             Failed ◄──────────┘ (deadline, embedded error, rejection)
//! ```
//!
//! The overall deadline starts when the node accepts the upgrade command
//! and is shared by streaming and reconnecting; a reconnect does not reset
//! it. Health verification has its own budgets and never fails the node.
//! Cancellation is checked ahead of every other outcome in every wait.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use noderoll_core::{CancelSignal, Clock, Node, UpgradeProgress, UpgradeRequest};
use noderoll_health::{NodeWaiter, WaitError};
use noderoll_probe::{EventStream, NodeStateProbe, Tail};
use tracing::{debug, info, warn};

use crate::error::{UpgradeError, UpgradeResult};
use crate::observer::{HealthCheck, RolloutObserver};
use crate::options::UpgradeOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    Idle,
    CommandIssued,
    Streaming,
    Reconnecting,
    VerifyingHealth,
    Done,
    Failed,
}

/// How the node was seen to finish its upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Running stage observed on the original subscription.
    RunningEvent,
    /// Running stage observed on the post-reboot subscription.
    ReconnectEvent,
    /// Reachable and ready after reboot without a trailing running event.
    ReachableAndReady,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    pub from_version: String,
    pub to_version: Option<String>,
    pub completion: Completion,
    /// Health checks that did not pass in time.
    pub health_warnings: Vec<String>,
}

/// Collaborators shared by every node of a rollout.
#[derive(Clone)]
pub struct UpgradeContext {
    pub probe: Arc<dyn NodeStateProbe>,
    pub clock: Arc<dyn Clock>,
    pub options: UpgradeOptions,
}

impl UpgradeContext {
    pub fn new(probe: Arc<dyn NodeStateProbe>, clock: Arc<dyn Clock>, options: UpgradeOptions) -> Self {
        Self {
            probe,
            clock,
            options,
        }
    }

    pub fn waiter(&self) -> NodeWaiter {
        NodeWaiter::new(self.probe.clone(), self.clock.clone(), self.options.health_poll)
    }
}

enum StreamEnd {
    Running,
    Disconnected,
}

pub struct UpgradeMachine<'a> {
    ctx: &'a UpgradeContext,
    node: &'a Node,
    observer: &'a dyn RolloutObserver,
    cancel: &'a CancelSignal,
    state: UpgradeState,
    history: Vec<UpgradeState>,
}

impl<'a> UpgradeMachine<'a> {
    pub fn new(
        ctx: &'a UpgradeContext,
        node: &'a Node,
        observer: &'a dyn RolloutObserver,
        cancel: &'a CancelSignal,
    ) -> Self {
        Self {
            ctx,
            node,
            observer,
            cancel,
            state: UpgradeState::Idle,
            history: vec![UpgradeState::Idle],
        }
    }

    pub fn state(&self) -> UpgradeState {
        self.state
    }

    /// Every state entered, in order.
    pub fn history(&self) -> &[UpgradeState] {
        &self.history
    }

    /// Drive the node from command issuance to a terminal state.
    pub async fn run(&mut self, req: &UpgradeRequest, from_version: &str) -> UpgradeResult<UpgradeReport> {
        match self.drive(req, from_version).await {
            Ok(report) => {
                self.enter(UpgradeState::Done);
                Ok(report)
            }
            Err(e) => {
                self.enter(UpgradeState::Failed);
                Err(e)
            }
        }
    }

    fn enter(&mut self, state: UpgradeState) {
        debug!(node = %self.node.address, from = ?self.state, to = ?state, "upgrade state");
        self.state = state;
        self.history.push(state);
    }

    fn emit(&self, progress: UpgradeProgress) {
        self.observer.progress(self.node, &progress);
    }

    async fn drive(&mut self, req: &UpgradeRequest, from_version: &str) -> UpgradeResult<UpgradeReport> {
        let node: &'a Node = self.node;
        let ctx: &'a UpgradeContext = self.ctx;
        let address = node.address.as_str();
        let probe = ctx.probe.as_ref();

        self.enter(UpgradeState::CommandIssued);
        self.cancel.check()?;
        info!(node = %address, image = %req.image, preserve = self.ctx.options.preserve, "issuing upgrade");
        self.cancel
            .guard(probe.upgrade(address, &req.image, self.ctx.options.preserve))
            .await?
            .map_err(|e| UpgradeError::CommandRejected(e.to_string()))?;

        let deadline = self.ctx.clock.now() + self.ctx.options.node_timeout;

        self.enter(UpgradeState::Streaming);
        let completion = match self.stream(deadline).await? {
            StreamEnd::Running => Completion::RunningEvent,
            StreamEnd::Disconnected => {
                self.enter(UpgradeState::Reconnecting);
                self.reconnect(deadline).await?
            }
        };
        info!(node = %address, completion = ?completion, "node is running");

        self.enter(UpgradeState::VerifyingHealth);
        let health_warnings = self.verify_health().await?;

        let to_version = match self.cancel.guard(probe.version(address)).await? {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(node = %address, error = %e, "could not read version after upgrade");
                None
            }
        };

        Ok(UpgradeReport {
            from_version: from_version.to_string(),
            to_version,
            completion,
            health_warnings,
        })
    }

    async fn stream(&self, deadline: Instant) -> UpgradeResult<StreamEnd> {
        let address = self.node.address.as_str();
        let mut rx = match self
            .cancel
            .guard(self.ctx.probe.watch_upgrade(address, Tail::New))
            .await?
        {
            Ok(rx) => rx,
            Err(e) => {
                // The node may already be going down.
                warn!(node = %address, error = %e, "could not subscribe to upgrade events");
                self.emit(UpgradeProgress::stage("rebooting", "connection lost"));
                return Ok(StreamEnd::Disconnected);
            }
        };

        loop {
            let remaining = deadline.saturating_duration_since(self.ctx.clock.now());
            if remaining.is_zero() {
                return Err(self.timeout());
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(UpgradeError::Cancelled),
                item = rx.recv() => match item {
                    Some(Ok(event)) => {
                        let Some(progress) = event.to_progress() else {
                            continue;
                        };
                        self.emit(progress.clone());
                        if let Some(err) = progress.error {
                            return Err(UpgradeError::StreamFailure(err));
                        }
                        if progress.done {
                            return Ok(StreamEnd::Running);
                        }
                    }
                    Some(Err(e)) => {
                        debug!(node = %address, error = %e, "event stream dropped");
                        self.emit(UpgradeProgress::stage("rebooting", "connection lost"));
                        return Ok(StreamEnd::Disconnected);
                    }
                    None => {
                        debug!(node = %address, "event stream closed");
                        self.emit(UpgradeProgress::stage("rebooting", "connection lost"));
                        return Ok(StreamEnd::Disconnected);
                    }
                },
                _ = self.ctx.clock.after(remaining) => return Err(self.timeout()),
            }
        }
    }

    async fn reconnect(&self, deadline: Instant) -> UpgradeResult<Completion> {
        let address = self.node.address.as_str();
        let probe = self.ctx.probe.as_ref();
        self.emit(UpgradeProgress::stage("rebooting", "waiting for node to come back"));

        loop {
            let remaining = deadline.saturating_duration_since(self.ctx.clock.now());
            if remaining.is_zero() {
                return Err(self.reboot_timeout());
            }
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(UpgradeError::Cancelled),
                _ = self.ctx.clock.after(self.ctx.options.reconnect_poll.min(remaining)) => {}
            }

            match self.before(deadline, probe.is_reachable(address)).await? {
                Some(true) => {}
                Some(false) => continue,
                None => return Err(self.reboot_timeout()),
            }
            debug!(node = %address, "node reachable again");

            let saw_running = self.tail_for_running(deadline).await?;
            if saw_running {
                return Ok(Completion::ReconnectEvent);
            }
            match self.before(deadline, self.cluster_ready()).await? {
                Some(true) => {}
                Some(false) => continue,
                None => return Err(self.reboot_timeout()),
            }
            if self.ctx.clock.now() >= deadline {
                return Err(self.reboot_timeout());
            }
            // No running event in the short window is not proof of failure.
            self.emit(UpgradeProgress {
                stage: Some("running".to_string()),
                done: true,
                ..Default::default()
            });
            return Ok(Completion::ReachableAndReady);
        }
    }

    /// Run `fut` unless the overall deadline passes first, in which case
    /// `None` is returned.
    async fn before<T>(&self, deadline: Instant, fut: impl Future<Output = T>) -> UpgradeResult<Option<T>> {
        let remaining = deadline.saturating_duration_since(self.ctx.clock.now());
        if remaining.is_zero() {
            return Ok(None);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(UpgradeError::Cancelled),
            value = fut => Ok(Some(value)),
            _ = self.ctx.clock.after(remaining) => Ok(None),
        }
    }

    /// Replay recent events looking for the running stage, for at most the
    /// reconnect window and never past the overall deadline.
    async fn tail_for_running(&self, deadline: Instant) -> UpgradeResult<bool> {
        let address = self.node.address.as_str();
        let tail = Tail::Recent(self.ctx.options.reconnect_tail);
        let opened = match self.before(deadline, self.ctx.probe.watch_upgrade(address, tail)).await? {
            Some(opened) => opened,
            None => return Ok(false),
        };
        let mut rx: EventStream = match opened {
            Ok(rx) => rx,
            Err(e) => {
                debug!(node = %address, error = %e, "post-reboot subscription failed");
                return Ok(false);
            }
        };

        let remaining = deadline.saturating_duration_since(self.ctx.clock.now());
        let mut window = self.ctx.clock.after(self.ctx.options.reconnect_window.min(remaining));
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(UpgradeError::Cancelled),
                item = rx.recv() => match item {
                    Some(Ok(event)) => {
                        let Some(progress) = event.to_progress() else {
                            continue;
                        };
                        self.emit(progress.clone());
                        if let Some(err) = progress.error {
                            return Err(UpgradeError::StreamFailure(err));
                        }
                        if progress.done {
                            return Ok(true);
                        }
                    }
                    Some(Err(_)) | None => return Ok(false),
                },
                _ = &mut window => return Ok(false),
            }
        }
    }

    /// Cluster readiness, treating "no cluster API" as ready.
    async fn cluster_ready(&self) -> bool {
        let address = self.node.address.as_str();
        match self.ctx.probe.node_ready(address).await {
            Ok(None) | Ok(Some(true)) => true,
            Ok(Some(false)) => false,
            Err(e) => {
                debug!(node = %address, error = %e, "readiness query failed");
                false
            }
        }
    }

    async fn verify_health(&self) -> UpgradeResult<Vec<String>> {
        let waiter = self.ctx.waiter();
        let mut warnings = Vec::new();

        self.observer.health_started(self.node, HealthCheck::Services);
        let res = waiter
            .wait_for_services(&self.node.address, self.node.role, self.ctx.options.service_timeout, self.cancel)
            .await;
        self.observer.health_finished(self.node, HealthCheck::Services, &res);
        self.record_health(res, &mut warnings)?;

        if self.node.role.is_control_plane() {
            self.observer.health_started(self.node, HealthCheck::StaticWorkloads);
            let res = waiter
                .wait_for_static_workloads(&self.node.address, self.ctx.options.workload_timeout, self.cancel)
                .await;
            self.observer.health_finished(self.node, HealthCheck::StaticWorkloads, &res);
            self.record_health(res, &mut warnings)?;
        }
        Ok(warnings)
    }

    fn record_health(&self, res: Result<(), WaitError>, warnings: &mut Vec<String>) -> UpgradeResult<()> {
        match res {
            Ok(()) => Ok(()),
            Err(WaitError::Cancelled) => Err(UpgradeError::Cancelled),
            Err(e) => {
                warn!(node = %self.node.address, error = %e, "health check did not pass");
                warnings.push(e.to_string());
                Ok(())
            }
        }
    }

    fn reboot_timeout(&self) -> UpgradeError {
        UpgradeError::RebootTimeout {
            address: self.node.address.clone(),
        }
    }

    fn timeout(&self) -> UpgradeError {
        UpgradeError::Timeout {
            address: self.node.address.clone(),
            after: self.ctx.options.node_timeout,
        }
    }
}
