//! Shared types used across noderoll crates.

use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "controlplane")]
    ControlPlane,
    #[serde(rename = "worker")]
    Worker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::ControlPlane => "controlplane",
            Role::Worker => "worker",
        }
    }

    pub fn is_control_plane(&self) -> bool {
        matches!(self, Role::ControlPlane)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    /// Accepts the machine types reported by cluster membership as well as
    /// the config spelling (`init` is the bootstrap control plane).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "controlplane" | "control-plane" | "init" => Ok(Role::ControlPlane),
            "worker" | "join" => Ok(Role::Worker),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One machine in the cluster. Identity is the address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub address: String,
    pub role: Role,
    pub profile: String,
}

impl Node {
    pub fn new(address: &str, role: Role, profile: &str) -> Self {
        Self {
            address: address.to_string(),
            role,
            profile: profile.to_string(),
        }
    }
}

/// Board overlay for single-board computers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlay {
    pub name: String,
    pub image: String,
}

/// Declared target configuration for a class of nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arch: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub secureboot: bool,
    #[serde(default)]
    pub kernel_args: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<Overlay>,
}

/// An OS extension as reported by a running node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub name: String,
    pub version: String,
    pub image: String,
}

impl ExtensionInfo {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }
}

/// A member discovered through cluster membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub address: String,
    pub hostname: String,
    pub role: Role,
    /// Raw machine type as reported by the node.
    pub machine_type: String,
}

/// Hardware identity used for profile detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub system_manufacturer: String,
    pub system_product_name: String,
    pub processor_manufacturer: String,
    pub processor_product_name: String,
}

/// Everything needed to upgrade one node. Built right before the node is
/// touched and dropped afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub node: Node,
    /// Full installer image reference.
    pub image: String,
    /// Target OS version, without a leading `v`.
    pub version: String,
    pub expected_extensions: Vec<String>,
    pub expected_kernel_args: Vec<String>,
}

impl UpgradeRequest {
    pub fn new(node: Node, profile: &Profile, image: &str, version: &str) -> Self {
        Self {
            node,
            image: image.to_string(),
            version: version.to_string(),
            expected_extensions: profile.extensions.clone(),
            expected_kernel_args: profile.kernel_args.clone(),
        }
    }
}

/// One progress record emitted while an upgrade is observed.
///
/// Records are delivered in order and may repeat; suppressing repeats is
/// up to whoever renders them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeProgress {
    /// Coarse machine stage (`booting`, `upgrading`, `rebooting`, `running`).
    pub stage: Option<String>,
    pub phase: Option<String>,
    pub task: Option<String>,
    /// `START`/`STOP` for sequence, phase and task events; free text for
    /// synthetic records.
    pub action: Option<String>,
    pub error: Option<String>,
    pub done: bool,
}

impl UpgradeProgress {
    pub fn stage(stage: &str, action: &str) -> Self {
        Self {
            stage: Some(stage.to_string()),
            action: Some(action.to_string()),
            ..Default::default()
        }
    }
}

/// Strip a leading `v` from a version tag.
pub fn strip_version_prefix(tag: &str) -> &str {
    tag.strip_prefix('v').unwrap_or(tag)
}

/// Order node addresses: IPs numerically, anything else lexically after IPs.
pub fn compare_addresses(a: &str, b: &str) -> Ordering {
    match (a.parse::<IpAddr>(), b.parse::<IpAddr>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parses_machine_types() {
        assert_eq!("controlplane".parse::<Role>().unwrap(), Role::ControlPlane);
        assert_eq!("init".parse::<Role>().unwrap(), Role::ControlPlane);
        assert_eq!("Worker".parse::<Role>().unwrap(), Role::Worker);
        assert!("gateway".parse::<Role>().is_err());
    }

    #[test]
    fn addresses_sort_numerically() {
        let mut addrs = vec!["192.168.1.10", "192.168.1.9", "node-a", "10.0.0.1"];
        addrs.sort_by(|a, b| compare_addresses(a, b));
        assert_eq!(addrs, vec!["10.0.0.1", "192.168.1.9", "192.168.1.10", "node-a"]);
    }

    #[test]
    fn version_prefix_stripped() {
        assert_eq!(strip_version_prefix("v1.9.5"), "1.9.5");
        assert_eq!(strip_version_prefix("1.9.5"), "1.9.5");
    }

    #[test]
    fn request_copies_profile_expectations() {
        let profile = Profile {
            arch: "amd64".into(),
            platform: "metal".into(),
            extensions: vec!["siderolabs/i915".into()],
            kernel_args: vec!["nomodeset".into()],
            ..Default::default()
        };
        let node = Node::new("10.0.0.5", Role::Worker, "intel");
        let req = UpgradeRequest::new(node, &profile, "img:v1.10.0", "1.10.0");
        assert_eq!(req.expected_extensions, vec!["siderolabs/i915"]);
        assert_eq!(req.expected_kernel_args, vec!["nomodeset"]);
    }
}
