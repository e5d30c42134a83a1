//! Target resolution: which nodes a rollout touches, and in what order.
//!
//! The inventory comes from the static node list or, when detection rules
//! are configured, from cluster discovery. It is sorted by address first;
//! the target filter then preserves that order, putting workers ahead of
//! control planes for `all`.

use std::fmt;

use noderoll_core::{Config, Node, Role, compare_addresses};
use noderoll_probe::NodeStateProbe;
use tracing::{debug, warn};

use crate::error::{RolloutError, RolloutResult};

/// Profile name reported for members whose hardware could not be matched.
pub const UNKNOWN_PROFILE: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Workers,
    ControlPlanes,
    /// A node address or a profile name.
    Named(String),
}

impl Target {
    pub fn parse(token: &str) -> Self {
        match token {
            "" | "all" => Target::All,
            "workers" => Target::Workers,
            "controlplanes" => Target::ControlPlanes,
            other => Target::Named(other.to_string()),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::All => f.write_str("all"),
            Target::Workers => f.write_str("workers"),
            Target::ControlPlanes => f.write_str("controlplanes"),
            Target::Named(name) => f.write_str(name),
        }
    }
}

/// How discovery treats members it cannot classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// Unclassified members abort: never upgrade against an unknown profile.
    Upgrade,
    /// Unclassified members are listed with the `unknown` profile.
    Status,
}

/// Apply a target to an already-ordered inventory.
pub fn select(nodes: &[Node], target: &Target, config: &Config) -> RolloutResult<Vec<Node>> {
    let by_role = |role: Role| -> Vec<Node> { nodes.iter().filter(|n| n.role == role).cloned().collect() };

    let selected = match target {
        Target::All => {
            let mut ordered = by_role(Role::Worker);
            ordered.extend(by_role(Role::ControlPlane));
            ordered
        }
        Target::Workers => by_role(Role::Worker),
        Target::ControlPlanes => by_role(Role::ControlPlane),
        Target::Named(name) => {
            if let Some(node) = nodes.iter().find(|n| &n.address == name) {
                vec![node.clone()]
            } else {
                let matched: Vec<Node> = nodes.iter().filter(|n| &n.profile == name).cloned().collect();
                if matched.is_empty() && !config.profiles.contains_key(name) {
                    return Err(RolloutError::UnknownTarget(name.clone()));
                }
                matched
            }
        }
    };

    if selected.is_empty() {
        return Err(RolloutError::NoNodes(target.to_string()));
    }
    Ok(selected)
}

/// Discover nodes from cluster membership and hardware detection.
pub async fn discover(
    config: &Config,
    probe: &dyn NodeStateProbe,
    mode: DiscoveryMode,
) -> RolloutResult<Vec<Node>> {
    let members = probe
        .cluster_members()
        .await
        .map_err(|e| RolloutError::DiscoveryFailed(format!("failed to list cluster members: {e}")))?;
    debug!(members = members.len(), "discovered cluster members");

    let mut nodes = Vec::with_capacity(members.len());
    for member in members {
        let profile = match probe.hardware_info(&member.address).await {
            Ok(hw) => match config.detect_profile(&hw) {
                Some(name) => name.to_string(),
                None if mode == DiscoveryMode::Upgrade => {
                    return Err(RolloutError::ProfileUndetected(member.address));
                }
                None => {
                    warn!(node = %member.address, "no detection rule matched");
                    UNKNOWN_PROFILE.to_string()
                }
            },
            Err(e) if mode == DiscoveryMode::Upgrade => {
                return Err(RolloutError::DiscoveryFailed(format!(
                    "failed to get hardware info for {}: {e}",
                    member.address
                )));
            }
            Err(e) => {
                warn!(node = %member.address, error = %e, "hardware query failed");
                UNKNOWN_PROFILE.to_string()
            }
        };
        nodes.push(Node {
            address: member.address,
            role: member.role,
            profile,
        });
    }

    nodes.sort_by(|a, b| compare_addresses(&a.address, &b.address));
    Ok(nodes)
}

/// The full ordered inventory for this invocation.
pub async fn inventory(
    config: &Config,
    probe: &dyn NodeStateProbe,
    mode: DiscoveryMode,
) -> RolloutResult<Vec<Node>> {
    if config.has_detection() {
        discover(config, probe, mode).await
    } else {
        Ok(config.all_nodes_ordered())
    }
}

/// Inventory filtered by target.
pub async fn resolve(
    config: &Config,
    probe: &dyn NodeStateProbe,
    target: &Target,
) -> RolloutResult<Vec<Node>> {
    let nodes = inventory(config, probe, DiscoveryMode::Upgrade).await?;
    select(&nodes, target, config)
}

/// Resolve a single node by address for a one-node upgrade.
///
/// The static inventory wins. Otherwise the role comes from cluster
/// membership (worker when the node is not a member) and the profile from
/// hardware detection.
pub async fn resolve_single(
    config: &Config,
    probe: &dyn NodeStateProbe,
    address: &str,
) -> RolloutResult<Node> {
    if let Some(node) = config.node_by_address(address) {
        return Ok(node.clone());
    }

    let hw = probe.hardware_info(address).await.map_err(|e| {
        RolloutError::DiscoveryFailed(format!("failed to get hardware info for {address}: {e}"))
    })?;
    let profile = config
        .detect_profile(&hw)
        .ok_or_else(|| RolloutError::ProfileUndetected(address.to_string()))?
        .to_string();

    let role = match probe.cluster_members().await {
        Ok(members) => members
            .iter()
            .find(|m| m.address == address)
            .map(|m| m.role)
            .unwrap_or(Role::Worker),
        Err(e) => {
            warn!(node = %address, error = %e, "membership query failed, assuming worker");
            Role::Worker
        }
    };

    Ok(Node {
        address: address.to_string(),
        role,
        profile,
    })
}
