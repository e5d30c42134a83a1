//! Convergence check: does a node need touching at all?
//!
//! A node is skipped only when its version, extension set and kernel
//! arguments all match the target. Version equality alone is not enough:
//! extensions or kernel parameters may have drifted out of band.

use std::collections::BTreeSet;

use noderoll_core::{ExtensionInfo, UpgradeRequest};
use noderoll_probe::NodeStateProbe;
use tracing::warn;

/// Extensions injected by the image build rather than requested by a
/// profile.
pub const INTERNAL_EXTENSIONS: &[&str] = &["schematic", "modules.dep"];

/// Live facts about one node, probed fresh right before the decision.
/// `None` means the probe failed for that dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFacts {
    pub version: Option<String>,
    pub extensions: Option<Vec<ExtensionInfo>>,
    pub cmdline: Option<String>,
}

impl NodeFacts {
    /// Query all three dimensions. Failures are logged and recorded as
    /// unknown rather than propagated.
    pub async fn gather(probe: &dyn NodeStateProbe, address: &str) -> Self {
        let version = match probe.version(address).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(node = %address, error = %e, "could not read version");
                None
            }
        };
        let extensions = match probe.extensions(address).await {
            Ok(exts) => Some(exts),
            Err(e) => {
                warn!(node = %address, error = %e, "could not read extensions");
                None
            }
        };
        let cmdline = match probe.kernel_cmdline(address).await {
            Ok(c) => Some(c),
            Err(e) => {
                warn!(node = %address, error = %e, "could not read kernel cmdline");
                None
            }
        };
        Self {
            version,
            extensions,
            cmdline,
        }
    }

    pub fn version_or_unknown(&self) -> &str {
        self.version.as_deref().unwrap_or("unknown")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub skip: bool,
    pub version_matches: bool,
    /// Empty when `skip` is true.
    pub detail: String,
}

/// Strip the vendor prefix: `siderolabs/i915` becomes `i915`.
pub fn extension_name(id: &str) -> &str {
    match id.rfind('/') {
        Some(idx) => &id[idx + 1..],
        None => id,
    }
}

/// Missing and extra extension names, each sorted.
pub fn extension_drift(running: &[ExtensionInfo], expected: &[String]) -> (Vec<String>, Vec<String>) {
    let running: BTreeSet<&str> = running
        .iter()
        .map(|e| e.name.as_str())
        .filter(|name| !INTERNAL_EXTENSIONS.contains(name))
        .collect();
    let expected: BTreeSet<&str> = expected.iter().map(|e| extension_name(e)).collect();

    let missing = expected.difference(&running).map(|s| s.to_string()).collect();
    let extra = running.difference(&expected).map(|s| s.to_string()).collect();
    (missing, extra)
}

/// Expected kernel args absent from the live command line, sorted.
pub fn missing_kernel_args(cmdline: &str, expected: &[String]) -> Vec<String> {
    let running: BTreeSet<&str> = cmdline.split_whitespace().collect();
    let missing: BTreeSet<&str> = expected
        .iter()
        .map(String::as_str)
        .filter(|arg| !running.contains(arg))
        .collect();
    missing.into_iter().map(str::to_string).collect()
}

pub fn decide(facts: &NodeFacts, req: &UpgradeRequest) -> Decision {
    let version_matches = facts.version.as_deref() == Some(req.version.as_str());
    let mut clauses = Vec::new();

    match &facts.extensions {
        Some(running) => {
            let (missing, extra) = extension_drift(running, &req.expected_extensions);
            if !missing.is_empty() {
                clauses.push(format!("missing: {}", missing.join(", ")));
            }
            if !extra.is_empty() {
                clauses.push(format!("extra: {}", extra.join(", ")));
            }
        }
        None => clauses.push("extensions unavailable".to_string()),
    }

    if !req.expected_kernel_args.is_empty() {
        match &facts.cmdline {
            Some(cmdline) => {
                let missing = missing_kernel_args(cmdline, &req.expected_kernel_args);
                if !missing.is_empty() {
                    clauses.push(format!("missing kernel args: {}", missing.join(", ")));
                }
            }
            None => clauses.push("kernel cmdline unavailable".to_string()),
        }
    }

    let skip = version_matches && clauses.is_empty();
    Decision {
        skip,
        version_matches,
        detail: if skip { String::new() } else { clauses.join("; ") },
    }
}
