//! Read-only cluster status, collected in parallel.
//!
//! One task per node writes into a shared, mutex-guarded buffer; the
//! caller joins every task and sorts the result by address.

use std::sync::Arc;

use noderoll_core::{Config, Node, Role, compare_addresses};
use noderoll_probe::NodeStateProbe;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::RolloutResult;
use crate::target::{DiscoveryMode, inventory};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub address: String,
    pub role: Role,
    pub profile: String,
    pub secureboot: bool,
    /// `None` when the node is unreachable or did not report.
    pub version: Option<String>,
    pub reachable: bool,
}

/// Status of every node in the inventory. Discovery problems are reported
/// as the `unknown` profile rather than failing.
pub async fn collect_status(config: &Config, probe: Arc<dyn NodeStateProbe>) -> RolloutResult<Vec<NodeStatus>> {
    let nodes = inventory(config, probe.as_ref(), DiscoveryMode::Status).await?;
    Ok(probe_nodes(config, nodes, probe).await)
}

pub async fn probe_nodes(config: &Config, nodes: Vec<Node>, probe: Arc<dyn NodeStateProbe>) -> Vec<NodeStatus> {
    let results = Arc::new(Mutex::new(Vec::with_capacity(nodes.len())));
    let mut handles = Vec::with_capacity(nodes.len());

    for node in nodes {
        let secureboot = config.profile(&node.profile).is_some_and(|p| p.secureboot);
        let probe = probe.clone();
        let results = results.clone();
        handles.push(tokio::spawn(async move {
            let reachable = probe.is_reachable(&node.address).await;
            let version = if reachable {
                match probe.version(&node.address).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        debug!(node = %node.address, error = %e, "version query failed");
                        None
                    }
                }
            } else {
                None
            };
            results.lock().await.push(NodeStatus {
                address: node.address,
                role: node.role,
                profile: node.profile,
                secureboot,
                version,
                reachable,
            });
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "status task failed");
        }
    }

    let mut statuses = std::mem::take(&mut *results.lock().await);
    statuses.sort_by(|a, b| compare_addresses(&a.address, &b.address));
    statuses
}
