//! Deadline-bounded polling of a node's health.
//!
//! Every loop has the same shape:
//!
//! ```text
//!   loop:
//!     cancelled?        → Err(Cancelled)
//!     deadline passed?  → Err(Timeout)
//!     query probe once  → healthy? Ok(())   (probe errors count as "not yet")
//!     sleep(poll) racing cancellation
//! ```
//!
//! Cancellation is checked first so a cancelled run never reports a
//! timeout or a success.

use std::sync::Arc;
use std::time::{Duration, Instant};

use noderoll_core::{CancelSignal, Clock, Role};
use noderoll_probe::NodeStateProbe;
use tracing::debug;

use crate::checker::{CONTROL_PLANE_WORKLOADS, Verdict, required_services, services_verdict, workloads_verdict};
use crate::error::{WaitError, WaitResult};

#[derive(Clone)]
pub struct NodeWaiter {
    probe: Arc<dyn NodeStateProbe>,
    clock: Arc<dyn Clock>,
    poll: Duration,
}

impl NodeWaiter {
    pub fn new(probe: Arc<dyn NodeStateProbe>, clock: Arc<dyn Clock>, poll: Duration) -> Self {
        Self { probe, clock, poll }
    }

    pub fn with_poll(&self, poll: Duration) -> Self {
        Self {
            poll,
            ..self.clone()
        }
    }

    /// Wait until the role's required services are running and healthy.
    pub async fn wait_for_services(
        &self,
        address: &str,
        role: Role,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> WaitResult<()> {
        let names = required_services(role);
        let deadline = self.clock.now() + timeout;
        let mut pending: Vec<String> = names.iter().map(|s| s.to_string()).collect();

        loop {
            self.check(cancel, deadline, || {
                format!("services on {address} (pending: {})", pending.join(", "))
            }, timeout)?;

            match cancel.guard(self.probe.service_states(address, names)).await? {
                Ok(states) => match services_verdict(names, &states) {
                    Verdict::Healthy => {
                        debug!(node = %address, "services healthy");
                        return Ok(());
                    }
                    Verdict::Pending(still) => pending = still,
                },
                Err(e) => debug!(node = %address, error = %e, "service query failed"),
            }

            self.pause(cancel).await?;
        }
    }

    /// Wait until the control-plane static workloads are running and ready.
    pub async fn wait_for_static_workloads(
        &self,
        address: &str,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> WaitResult<()> {
        let deadline = self.clock.now() + timeout;
        let mut pending: Vec<String> = CONTROL_PLANE_WORKLOADS.iter().map(|s| s.to_string()).collect();

        loop {
            self.check(cancel, deadline, || {
                format!("static workloads on {address} (pending: {})", pending.join(", "))
            }, timeout)?;

            match cancel.guard(self.probe.static_workloads(address)).await? {
                Ok(workloads) => match workloads_verdict(CONTROL_PLANE_WORKLOADS, &workloads) {
                    Verdict::Healthy => {
                        debug!(node = %address, "static workloads ready");
                        return Ok(());
                    }
                    Verdict::Pending(still) => pending = still,
                },
                Err(e) => debug!(node = %address, error = %e, "static workload query failed"),
            }

            self.pause(cancel).await?;
        }
    }

    /// Wait until the node answers and, when the cluster API is available,
    /// reports ready.
    pub async fn wait_for_node_ready(
        &self,
        address: &str,
        timeout: Duration,
        cancel: &CancelSignal,
    ) -> WaitResult<()> {
        let deadline = self.clock.now() + timeout;

        loop {
            self.check(cancel, deadline, || format!("node {address} to become ready"), timeout)?;

            if cancel.guard(self.probe.is_reachable(address)).await? {
                match cancel.guard(self.probe.node_ready(address)).await? {
                    Ok(None) | Ok(Some(true)) => return Ok(()),
                    Ok(Some(false)) => debug!(node = %address, "node not ready yet"),
                    Err(e) => debug!(node = %address, error = %e, "readiness query failed"),
                }
            }

            self.pause(cancel).await?;
        }
    }

    fn check(
        &self,
        cancel: &CancelSignal,
        deadline: Instant,
        what: impl FnOnce() -> String,
        timeout: Duration,
    ) -> WaitResult<()> {
        cancel.check()?;
        if self.clock.now() >= deadline {
            return Err(WaitError::Timeout {
                what: what(),
                after: timeout,
            });
        }
        Ok(())
    }

    async fn pause(&self, cancel: &CancelSignal) -> WaitResult<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WaitError::Cancelled),
            _ = self.clock.sleep(self.poll) => Ok(()),
        }
    }
}
