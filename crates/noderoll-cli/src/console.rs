//! Operator-facing output on stdout. Diagnostics go through `tracing` to
//! stderr instead.

use std::fmt::Display;
use std::sync::Mutex;

use noderoll_core::{Node, UpgradeProgress};
use noderoll_health::{CONTROL_PLANE_WORKLOADS, WaitError, required_services};
use noderoll_rollout::{
    Decision, HealthCheck, NodeFacts, NodeOutcome, NodeStatus, RolloutObserver, RolloutSummary,
};
use tabled::Tabled;

pub fn info(msg: impl Display) {
    println!("[INFO] {msg}");
}

pub fn ok(msg: impl Display) {
    println!("[OK] {msg}");
}

pub fn warn(msg: impl Display) {
    println!("[WARN] {msg}");
}

pub fn error(msg: impl Display) {
    eprintln!("[ERROR] {msg}");
}

pub fn header(msg: impl Display) {
    println!("=== {msg} ===");
}

pub fn sub_header(msg: impl Display) {
    println!("--- {msg} ---");
}

pub fn separator() {
    println!("============================================");
}

#[derive(Tabled)]
#[tabled(rename_all = "SCREAMING_SNAKE_CASE")]
struct StatusRow {
    node: String,
    #[tabled(rename = "TYPE")]
    role: String,
    profile: String,
    version: String,
    secboot: &'static str,
    status: &'static str,
}

impl From<&NodeStatus> for StatusRow {
    fn from(s: &NodeStatus) -> Self {
        Self {
            node: s.address.clone(),
            role: s.role.to_string(),
            profile: s.profile.clone(),
            version: s.version.clone().unwrap_or_else(|| "N/A".to_string()),
            secboot: if s.secureboot { "yes" } else { "no" },
            status: if s.reachable { "OK" } else { "UNREACHABLE" },
        }
    }
}

pub fn status_table(statuses: &[NodeStatus]) -> String {
    let rows: Vec<StatusRow> = statuses.iter().map(StatusRow::from).collect();
    tabled::Table::new(rows)
        .with(tabled::settings::Style::empty())
        .with(tabled::settings::Padding::new(0, 2, 0, 0))
        .to_string()
}

pub fn print_status(statuses: &[NodeStatus]) {
    header("Cluster Status");
    println!();
    println!("{}", status_table(statuses));
}

fn join_addresses<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> String {
    let list: Vec<&str> = nodes.into_iter().map(|n| n.address.as_str()).collect();
    if list.is_empty() { "none".to_string() } else { list.join(", ") }
}

pub fn print_summary(summary: &RolloutSummary) {
    println!();
    separator();
    header("Upgrade Summary");
    println!();

    info(format!("Skipped (already at target): {}", join_addresses(summary.skipped())));
    let planned = summary.planned();
    if !planned.is_empty() {
        info(format!("Would upgrade: {}", join_addresses(planned)));
    }
    info(format!("Upgraded: {}", join_addresses(summary.succeeded())));

    let failed = summary.failed();
    if failed.is_empty() {
        info("Failed: none");
    } else {
        for (node, reason) in &failed {
            error(format!("Failed: {} ({reason})", node.address));
        }
    }

    if summary.cancelled {
        warn("Rollout cancelled; remaining nodes were not attempted");
    } else if summary.halted {
        warn("Rollout halted; remaining nodes were not attempted");
    } else if let Some(line) = closing_line(summary) {
        ok(line);
    }
}

/// Closing line for a rollout that ran to the end without failures.
fn closing_line(summary: &RolloutSummary) -> Option<&'static str> {
    if summary.results.is_empty() || summary.has_failures() {
        None
    } else if summary.dry_run {
        Some("Dry run complete; no changes made")
    } else {
        Some("All nodes upgraded successfully!")
    }
}

/// Last phase and task printed, for repeat suppression.
#[derive(Default)]
struct Seen {
    phase: Option<String>,
    task: Option<String>,
}

#[derive(Default)]
pub struct ConsoleObserver {
    seen: Mutex<Seen>,
}

impl ConsoleObserver {
    /// True when `value` differs from the last one recorded by `slot`.
    fn changed(&self, value: &str, slot: impl FnOnce(&mut Seen) -> &mut Option<String>) -> bool {
        let Ok(mut seen) = self.seen.lock() else {
            return true;
        };
        let last = slot(&mut *seen);
        if last.as_deref() == Some(value) {
            return false;
        }
        *last = Some(value.to_string());
        true
    }
}

impl RolloutObserver for ConsoleObserver {
    fn plan(&self, nodes: &[Node], version: &str, dry_run: bool) {
        header(format!("Cluster upgrade to v{version}"));
        println!();
        if dry_run {
            warn("DRY RUN MODE - No changes will be made");
            println!();
        }
        println!("Nodes to upgrade (in order):");
        for node in nodes {
            println!("  - {} ({}, profile: {})", node.address, node.role, node.profile);
        }
        println!();
    }

    fn resolving_image(&self, profile: &str) {
        info(format!("Getting installer image for profile {profile}..."));
    }

    fn image_resolved(&self, _profile: &str, image: &str) {
        ok(format!("  {image}"));
    }

    fn node_started(&self, node: &Node, index: usize, total: usize) {
        if let Ok(mut seen) = self.seen.lock() {
            *seen = Seen::default();
        }
        println!();
        separator();
        info(format!("[{index}/{total}] {} ({})", node.address, node.role));
    }

    fn node_decision(&self, node: &Node, facts: &NodeFacts, decision: &Decision, image: &str) {
        if decision.skip {
            ok(format!(
                "Node {} already at v{} with matching config, skipping",
                node.address,
                facts.version_or_unknown()
            ));
            return;
        }
        info(format!("Upgrading node {} ({})", node.address, node.role));
        info(format!("  Current version: {}", facts.version_or_unknown()));
        if !decision.detail.is_empty() {
            info(format!("  Config differs: {}", decision.detail));
        }
        info(format!("  Target image: {image}"));
    }

    fn would_upgrade(&self, node: &Node, image: &str, preserve: bool) {
        warn(format!(
            "DRY RUN: Would run: talosctl upgrade -n {} --image {image} --preserve={preserve}",
            node.address
        ));
    }

    fn progress(&self, _node: &Node, p: &UpgradeProgress) {
        if let Some(stage) = &p.stage {
            match &p.action {
                Some(action) => info(format!("  [{stage}] {action}")),
                None => info(format!("  [{stage}]")),
            }
        }
        let action = p.action.as_deref().unwrap_or_default();
        if let Some(phase) = &p.phase {
            if self.changed(phase, |s| &mut s.phase) {
                info(format!("    phase: {phase} ({action})"));
            }
        }
        if let Some(task) = &p.task {
            if self.changed(task, |s| &mut s.task) {
                info(format!("      task: {task} ({action})"));
            }
        }
        if let Some(err) = &p.error {
            error(format!("    {err}"));
        }
    }

    fn health_started(&self, node: &Node, check: HealthCheck) {
        match check {
            HealthCheck::Services => {
                info(format!("Waiting for services: {}", required_services(node.role).join(", ")))
            }
            HealthCheck::StaticWorkloads => info(format!(
                "Waiting for control plane pods: {}",
                CONTROL_PLANE_WORKLOADS.join(", ")
            )),
        }
    }

    fn health_finished(&self, _node: &Node, check: HealthCheck, result: &Result<(), WaitError>) {
        let what = match check {
            HealthCheck::Services => "Services",
            HealthCheck::StaticWorkloads => "Control plane pods",
        };
        match result {
            Ok(()) => ok(format!("{what} healthy")),
            Err(e) => warn(format!("{what} health check did not pass: {e}")),
        }
    }

    fn node_finished(&self, node: &Node, outcome: &NodeOutcome) {
        match outcome {
            NodeOutcome::Succeeded(report) => ok(format!(
                "Node {} upgraded: {} -> {}",
                node.address,
                report.from_version,
                report.to_version.as_deref().unwrap_or("unknown")
            )),
            NodeOutcome::Failed(e) => error(format!("Failed to upgrade {}: {e}", node.address)),
            NodeOutcome::Skipped | NodeOutcome::Planned { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noderoll_core::Role;

    #[test]
    fn status_table_columns() {
        let rows = vec![
            NodeStatus {
                address: "192.168.1.5".into(),
                role: Role::ControlPlane,
                profile: "intel".into(),
                secureboot: true,
                version: Some("1.10.0".into()),
                reachable: true,
            },
            NodeStatus {
                address: "192.168.1.30".into(),
                role: Role::Worker,
                profile: "unknown".into(),
                secureboot: false,
                version: None,
                reachable: false,
            },
        ];
        let table = status_table(&rows);
        let lines: Vec<&str> = table.lines().collect();
        let head: Vec<&str> = lines[0].split_whitespace().collect();
        assert_eq!(head, vec!["NODE", "TYPE", "PROFILE", "VERSION", "SECBOOT", "STATUS"]);
        let last: Vec<&str> = lines[2].split_whitespace().collect();
        assert_eq!(last, vec!["192.168.1.30", "worker", "unknown", "N/A", "no", "UNREACHABLE"]);
    }

    fn result(address: &str, outcome: NodeOutcome) -> noderoll_rollout::NodeResult {
        noderoll_rollout::NodeResult {
            node: Node::new(address, Role::Worker, "intel"),
            outcome,
        }
    }

    #[test]
    fn dry_run_never_claims_success() {
        let summary = RolloutSummary {
            dry_run: true,
            results: vec![
                result("10.0.0.3", NodeOutcome::Skipped),
                result("10.0.0.20", NodeOutcome::Planned { detail: String::new() }),
            ],
            ..Default::default()
        };
        assert_eq!(closing_line(&summary), Some("Dry run complete; no changes made"));

        let summary = RolloutSummary {
            results: vec![result("10.0.0.3", NodeOutcome::Skipped)],
            ..Default::default()
        };
        assert_eq!(closing_line(&summary), Some("All nodes upgraded successfully!"));
    }

    #[test]
    fn empty_or_failed_rollouts_have_no_closing_line() {
        assert_eq!(closing_line(&RolloutSummary::default()), None);
        let summary = RolloutSummary {
            results: vec![result(
                "10.0.0.2",
                NodeOutcome::Failed(noderoll_rollout::UpgradeError::CommandRejected("busy".into())),
            )],
            ..Default::default()
        };
        assert_eq!(closing_line(&summary), None);
    }

    #[test]
    fn repeated_phases_are_suppressed() {
        let observer = ConsoleObserver::default();
        assert!(observer.changed("stopServices", |s| &mut s.phase));
        assert!(!observer.changed("stopServices", |s| &mut s.phase));
        assert!(observer.changed("stopServices", |s| &mut s.task));
        assert!(observer.changed("unmount", |s| &mut s.phase));
    }
}
