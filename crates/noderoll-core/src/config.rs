//! noderoll.toml configuration parser.
//!
//! The loaded [`Config`] is immutable for the life of an invocation and is
//! passed explicitly to whatever needs it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{HardwareInfo, Node, Profile, Role, compare_addresses};

/// File names tried, in order, when no explicit path is given.
const SEARCH_PATHS: &[&str] = &["configs/noderoll.toml", "noderoll.toml"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found (searched: {0})")]
    NotFound(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("no profiles defined")]
    NoProfiles,

    #[error("profile {0}: arch is required")]
    MissingArch(String),

    #[error("profile {0}: platform is required")]
    MissingPlatform(String),

    #[error("no nodes defined and no detection rules configured")]
    NoNodes,

    #[error("node {0}: address is required")]
    MissingAddress(usize),

    #[error("node {address}: unknown profile {profile:?}")]
    UnknownNodeProfile { address: String, profile: String },

    #[error("detection rule {index}: unknown profile {profile:?}")]
    UnknownRuleProfile { index: usize, profile: String },

    #[error("detection rule {0}: at least one match criterion is required")]
    EmptyRule(usize),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub detection: Option<Detection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub factory_base_url: String,
    pub default_timeout_secs: u64,
    pub default_preserve: bool,
    pub releases_url: String,
    pub fallback_version: String,
    pub service_timeout_secs: u64,
    pub workload_timeout_secs: u64,
    pub health_poll_secs: u64,
    pub reconnect_poll_secs: u64,
    pub reconnect_window_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            factory_base_url: "https://factory.talos.dev".to_string(),
            default_timeout_secs: 600,
            default_preserve: true,
            releases_url: "https://api.github.com/repos/siderolabs/talos/releases/latest"
                .to_string(),
            fallback_version: "1.9.5".to_string(),
            service_timeout_secs: 60,
            workload_timeout_secs: 90,
            health_poll_secs: 2,
            reconnect_poll_secs: 2,
            reconnect_window_secs: 10,
        }
    }
}

/// How to reach the node management and cluster APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub talosctl: String,
    pub talosconfig: Option<PathBuf>,
    /// Enables the cluster readiness probe when set.
    pub kubectl: Option<String>,
    pub command_timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            talosctl: "talosctl".to_string(),
            talosconfig: None,
            kubectl: None,
            command_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub rules: Vec<DetectionRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRule {
    pub profile: String,
    #[serde(rename = "match", default)]
    pub criteria: MatchCriteria,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processor_manufacturer: Option<String>,
}

impl MatchCriteria {
    fn is_empty(&self) -> bool {
        self.system_manufacturer.is_none() && self.processor_manufacturer.is_none()
    }

    /// Every specified criterion must be a case-insensitive substring of the
    /// corresponding hardware field. An empty criteria set never matches.
    pub fn matches(&self, hw: &HardwareInfo) -> bool {
        if self.is_empty() {
            return false;
        }
        let contains = |haystack: &str, needle: &str| {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        };
        if let Some(sys) = &self.system_manufacturer {
            if !contains(&hw.system_manufacturer, sys) {
                return false;
            }
        }
        if let Some(cpu) = &self.processor_manufacturer {
            if !contains(&hw.processor_manufacturer, cpu) {
                return false;
            }
        }
        true
    }
}

impl Config {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load and validate. With no explicit path the search paths are tried
    /// relative to the working directory, then to the executable.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => find_config()?,
        };
        debug!(path = %path.display(), "loading config");
        let config = Self::from_file(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.profiles.is_empty() {
            return Err(ConfigError::NoProfiles);
        }
        for (name, profile) in &self.profiles {
            if profile.arch.is_empty() {
                return Err(ConfigError::MissingArch(name.clone()));
            }
            if profile.platform.is_empty() {
                return Err(ConfigError::MissingPlatform(name.clone()));
            }
        }

        if self.nodes.is_empty() && !self.has_detection() {
            return Err(ConfigError::NoNodes);
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.address.is_empty() {
                return Err(ConfigError::MissingAddress(i));
            }
            if !self.profiles.contains_key(&node.profile) {
                return Err(ConfigError::UnknownNodeProfile {
                    address: node.address.clone(),
                    profile: node.profile.clone(),
                });
            }
        }

        if let Some(detection) = &self.detection {
            for (i, rule) in detection.rules.iter().enumerate() {
                if !self.profiles.contains_key(&rule.profile) {
                    return Err(ConfigError::UnknownRuleProfile {
                        index: i,
                        profile: rule.profile.clone(),
                    });
                }
                if rule.criteria.is_empty() {
                    return Err(ConfigError::EmptyRule(i));
                }
            }
        }
        Ok(())
    }

    pub fn has_detection(&self) -> bool {
        self.detection
            .as_ref()
            .is_some_and(|d| !d.rules.is_empty())
    }

    /// First rule whose criteria all match wins.
    pub fn detect_profile(&self, hw: &HardwareInfo) -> Option<&str> {
        self.detection
            .as_ref()?
            .rules
            .iter()
            .find(|rule| rule.criteria.matches(hw))
            .map(|rule| rule.profile.as_str())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.get(name)
    }

    pub fn node_by_address(&self, address: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.address == address)
    }

    pub fn nodes_by_role(&self, role: Role) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.role == role).collect()
    }

    pub fn nodes_by_profile(&self, profile: &str) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.profile == profile).collect()
    }

    /// Static inventory sorted by address.
    pub fn all_nodes_ordered(&self) -> Vec<Node> {
        let mut nodes = self.nodes.clone();
        nodes.sort_by(|a, b| compare_addresses(&a.address, &b.address));
        nodes
    }
}

fn find_config() -> ConfigResult<PathBuf> {
    let mut tried = Vec::new();
    let mut bases = vec![PathBuf::from(".")];
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        bases.push(dir);
    }
    for base in bases {
        for rel in SEARCH_PATHS {
            let candidate = base.join(rel);
            if candidate.is_file() {
                return Ok(candidate);
            }
            tried.push(candidate.display().to_string());
        }
    }
    Err(ConfigError::NotFound(tried.join(", ")))
}
