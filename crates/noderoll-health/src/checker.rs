//! Health verdicts for a single observation of a node.
//!
//! Pure functions over what the probe reported; the polling lives in
//! [`crate::waiter`].

use noderoll_core::Role;
use noderoll_probe::{ServiceState, StaticWorkload};

/// Services every node must report healthy after an upgrade.
pub const WORKER_SERVICES: &[&str] = &["kubelet", "apid", "trustd"];

/// Control planes additionally run the consensus store.
pub const CONTROL_PLANE_SERVICES: &[&str] = &["etcd", "kubelet", "apid", "trustd"];

/// Static pods that make up the control plane.
pub const CONTROL_PLANE_WORKLOADS: &[&str] =
    &["kube-apiserver", "kube-controller-manager", "kube-scheduler"];

pub fn required_services(role: Role) -> &'static [&'static str] {
    match role {
        Role::ControlPlane => CONTROL_PLANE_SERVICES,
        Role::Worker => WORKER_SERVICES,
    }
}

/// Outcome of one health observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    /// Names still not healthy, in required order.
    Pending(Vec<String>),
}

impl Verdict {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Verdict::Healthy)
    }

    fn from_pending(pending: Vec<String>) -> Self {
        if pending.is_empty() {
            Verdict::Healthy
        } else {
            Verdict::Pending(pending)
        }
    }
}

/// A service is healthy when it is reported, running, and not reported
/// unhealthy. A service with no health information yet counts as healthy
/// once running.
pub fn service_healthy(state: &ServiceState) -> bool {
    state.running && (state.healthy || state.health_unknown)
}

pub fn services_verdict(required: &[&str], states: &[ServiceState]) -> Verdict {
    let pending = required
        .iter()
        .filter(|name| {
            !states
                .iter()
                .any(|s| s.id == **name && service_healthy(s))
        })
        .map(|name| name.to_string())
        .collect();
    Verdict::from_pending(pending)
}

/// Static pod ids carry a namespace and node suffix, so a required
/// workload is matched by substring.
pub fn workloads_verdict(required: &[&str], workloads: &[StaticWorkload]) -> Verdict {
    let pending = required
        .iter()
        .filter(|name| {
            !workloads
                .iter()
                .any(|w| w.id.contains(**name) && w.phase == "Running" && w.ready)
        })
        .map(|name| name.to_string())
        .collect();
    Verdict::from_pending(pending)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(id: &str, running: bool, healthy: bool) -> ServiceState {
        ServiceState {
            id: id.to_string(),
            running,
            healthy,
            health_unknown: false,
        }
    }

    fn pod(id: &str, phase: &str, ready: bool) -> StaticWorkload {
        StaticWorkload {
            id: id.to_string(),
            phase: phase.to_string(),
            ready,
        }
    }

    #[test]
    fn role_service_sets() {
        assert!(required_services(Role::ControlPlane).contains(&"etcd"));
        assert!(!required_services(Role::Worker).contains(&"etcd"));
        assert_eq!(required_services(Role::Worker).len(), 3);
    }

    #[test]
    fn all_services_healthy() {
        let states = vec![
            svc("kubelet", true, true),
            svc("apid", true, true),
            svc("trustd", true, true),
        ];
        assert!(services_verdict(WORKER_SERVICES, &states).is_healthy());
    }

    #[test]
    fn missing_service_counts_as_pending() {
        let states = vec![svc("kubelet", true, true), svc("apid", true, true)];
        assert_eq!(
            services_verdict(WORKER_SERVICES, &states),
            Verdict::Pending(vec!["trustd".into()])
        );
    }

    #[test]
    fn stopped_or_unhealthy_service_pending() {
        let states = vec![
            svc("etcd", false, false),
            svc("kubelet", true, false),
            svc("apid", true, true),
            svc("trustd", true, true),
        ];
        assert_eq!(
            services_verdict(CONTROL_PLANE_SERVICES, &states),
            Verdict::Pending(vec!["etcd".into(), "kubelet".into()])
        );
    }

    #[test]
    fn unknown_health_is_accepted_when_running() {
        let mut state = svc("apid", true, false);
        state.health_unknown = true;
        assert!(service_healthy(&state));
    }

    #[test]
    fn workloads_need_running_and_ready() {
        let pods = vec![
            pod("kube-system/kube-apiserver-cp1", "Running", true),
            pod("kube-system/kube-controller-manager-cp1", "Running", false),
            pod("kube-system/kube-scheduler-cp1", "Pending", true),
        ];
        assert_eq!(
            workloads_verdict(CONTROL_PLANE_WORKLOADS, &pods),
            Verdict::Pending(vec!["kube-controller-manager".into(), "kube-scheduler".into()])
        );
    }

    #[test]
    fn workloads_all_ready() {
        let pods = vec![
            pod("kube-system/kube-apiserver-cp1", "Running", true),
            pod("kube-system/kube-controller-manager-cp1", "Running", true),
            pod("kube-system/kube-scheduler-cp1", "Running", true),
        ];
        assert!(workloads_verdict(CONTROL_PLANE_WORKLOADS, &pods).is_healthy());
    }
}
