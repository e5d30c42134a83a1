//! [`NodeStateProbe`] backed by the `talosctl` and `kubectl` binaries.
//!
//! ```text
//!   TalosctlProbe
//!     ├── one-shot queries ── talosctl -n <node> get <resource> -o json
//!     ├── upgrade ────────── talosctl -n <node> upgrade --image .. --wait=false
//!     ├── watch ──────────── talosctl -n <node> events [--tail n]
//!     │                         (child process, stdout decoded line by line)
//!     └── node_ready ─────── kubectl get nodes -o json (optional)
//! ```
//!
//! Resource output is a stream of concatenated JSON documents; event output
//! is one row per event.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use noderoll_core::config::ProbeConfig;
use noderoll_core::{ClusterMember, ExtensionInfo, HardwareInfo, Role, strip_version_prefix};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ProbeError, ProbeResult, StreamError};
use crate::events::EventPayload;
use crate::probe::{
    EventStream, NodeStateProbe, ProbeFuture, ServiceState, StaticWorkload, Tail,
};

const WATCH_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct TalosctlProbe {
    talosctl: String,
    talosconfig: Option<PathBuf>,
    kubectl: Option<String>,
    command_timeout: Duration,
}

impl TalosctlProbe {
    pub fn new(config: &ProbeConfig) -> Self {
        Self {
            talosctl: config.talosctl.clone(),
            talosconfig: config.talosconfig.clone(),
            kubectl: config.kubectl.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
        }
    }

    fn talosctl(&self, node: Option<&str>, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.talosctl);
        if let Some(path) = &self.talosconfig {
            cmd.arg("--talosconfig").arg(path);
        }
        if let Some(node) = node {
            cmd.arg("-n").arg(node);
        }
        cmd.args(args);
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn run(&self, mut cmd: Command, label: &str) -> ProbeResult<String> {
        debug!(command = %label, "running");
        let output = tokio::time::timeout(self.command_timeout, cmd.output())
            .await
            .map_err(|_| ProbeError::Timeout {
                command: label.to_string(),
                secs: self.command_timeout.as_secs(),
            })?
            .map_err(|source| ProbeError::Spawn {
                command: label.to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProbeError::CommandFailed {
                command: label.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn get(&self, node: Option<&str>, resource: &str) -> ProbeResult<Vec<Value>> {
        let cmd = self.talosctl(node, &["get", resource, "-o", "json"]);
        let out = self.run(cmd, &format!("talosctl get {resource}")).await?;
        let (docs, _) = split_documents(out.as_bytes()).map_err(|e| ProbeError::Decode {
            what: resource.to_string(),
            reason: e.to_string(),
        })?;
        Ok(docs)
    }

    async fn query_version(&self, address: &str) -> ProbeResult<String> {
        let cmd = self.talosctl(Some(address), &["version"]);
        let out = self.run(cmd, "talosctl version").await?;
        parse_server_tag(&out)
            .map(|tag| strip_version_prefix(&tag).to_string())
            .ok_or_else(|| ProbeError::NotFound("server version".into()))
    }

    async fn query_hardware(&self, address: &str) -> ProbeResult<HardwareInfo> {
        let system = self.get(Some(address), "systeminformation").await?;
        let cpus = self.get(Some(address), "cpus").await?;
        let sys = system
            .first()
            .ok_or_else(|| ProbeError::NotFound("system information".into()))?;
        let cpu = cpus.first();
        Ok(HardwareInfo {
            system_manufacturer: str_at(sys, "/spec/manufacturer"),
            system_product_name: str_at(sys, "/spec/productName"),
            processor_manufacturer: cpu.map(|c| str_at(c, "/spec/manufacturer")).unwrap_or_default(),
            processor_product_name: cpu.map(|c| str_at(c, "/spec/productName")).unwrap_or_default(),
        })
    }

    async fn query_node_ready(&self, address: &str) -> ProbeResult<Option<bool>> {
        let Some(kubectl) = &self.kubectl else {
            return Ok(None);
        };
        let mut cmd = Command::new(kubectl);
        cmd.args(["get", "nodes", "-o", "json"])
            .stdin(Stdio::null())
            .kill_on_drop(true);
        let out = self.run(cmd, "kubectl get nodes").await?;
        let list: Value = serde_json::from_str(&out).map_err(|e| ProbeError::Decode {
            what: "node list".into(),
            reason: e.to_string(),
        })?;
        Ok(Some(node_ready_in_list(&list, address)))
    }

    fn spawn_watch(&self, address: &str, tail: Tail) -> ProbeResult<EventStream> {
        let args = watch_args(tail);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut cmd = self.talosctl(Some(address), &args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::null());
        let mut child = cmd.spawn().map_err(|source| ProbeError::Spawn {
            command: "talosctl events".into(),
            source,
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProbeError::Other("watch stdout unavailable".into()))?;

        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let node = address.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let reason = loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(event) = EventPayload::parse_line(&line) else {
                            continue;
                        };
                        if tx.send(Ok(event)).await.is_err() {
                            debug!(node = %node, "watch abandoned");
                            return;
                        }
                    }
                    Ok(None) => break "watch ended".to_string(),
                    Err(e) => break e.to_string(),
                }
            };
            debug!(node = %node, reason = %reason, "watch closed");
            let _ = tx.send(Err(StreamError(reason))).await;
            drop(child);
        });
        Ok(rx)
    }
}

/// `talosctl events` arguments. Without `--tail` only new events are shown.
pub(crate) fn watch_args(tail: Tail) -> Vec<String> {
    let mut args = vec!["events".to_string()];
    if let Tail::Recent(n) = tail {
        args.push("--tail".to_string());
        args.push(n.to_string());
    }
    args
}

/// Split a buffer of concatenated JSON documents. Returns the complete
/// documents and the number of bytes they occupied; a trailing partial
/// document is left for the next read.
pub(crate) fn split_documents(buf: &[u8]) -> Result<(Vec<Value>, usize), serde_json::Error> {
    let mut stream = serde_json::Deserializer::from_slice(buf).into_iter::<Value>();
    let mut docs = Vec::new();
    loop {
        let offset = stream.byte_offset();
        match stream.next() {
            None => return Ok((docs, stream.byte_offset())),
            Some(Ok(doc)) => docs.push(doc),
            Some(Err(e)) if e.is_eof() => return Ok((docs, offset)),
            Some(Err(e)) => return Err(e),
        }
    }
}

/// The `Tag:` line of the `Server:` section of `talosctl version`.
pub(crate) fn parse_server_tag(output: &str) -> Option<String> {
    let mut in_server = false;
    for line in output.lines() {
        let line = line.trim();
        if line.starts_with("Server:") {
            in_server = true;
            continue;
        }
        if in_server {
            if let Some(tag) = line.strip_prefix("Tag:") {
                return Some(tag.trim().to_string());
            }
        }
    }
    None
}

fn str_at(doc: &Value, pointer: &str) -> String {
    doc.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn bool_at(doc: &Value, pointer: &str) -> bool {
    doc.pointer(pointer).and_then(Value::as_bool).unwrap_or(false)
}

fn parse_extensions(docs: &[Value]) -> Vec<ExtensionInfo> {
    docs.iter()
        .map(|doc| ExtensionInfo {
            name: str_at(doc, "/spec/metadata/name"),
            version: str_at(doc, "/spec/metadata/version"),
            image: str_at(doc, "/spec/image"),
        })
        .filter(|ext| !ext.name.is_empty())
        .collect()
}

fn parse_services(docs: &[Value], names: &[&str]) -> Vec<ServiceState> {
    docs.iter()
        .map(|doc| ServiceState {
            id: str_at(doc, "/metadata/id"),
            running: bool_at(doc, "/spec/running"),
            healthy: bool_at(doc, "/spec/healthy"),
            health_unknown: bool_at(doc, "/spec/unknown"),
        })
        .filter(|svc| names.contains(&svc.id.as_str()))
        .collect()
}

fn parse_static_pods(docs: &[Value]) -> Vec<StaticWorkload> {
    docs.iter()
        .map(|doc| {
            let ready = doc
                .pointer("/spec/podStatus/conditions")
                .and_then(Value::as_array)
                .is_some_and(|conds| {
                    conds.iter().any(|c| {
                        c.get("type").and_then(Value::as_str) == Some("Ready")
                            && c.get("status").and_then(Value::as_str) == Some("True")
                    })
                });
            StaticWorkload {
                id: str_at(doc, "/metadata/id"),
                phase: str_at(doc, "/spec/podStatus/phase"),
                ready,
            }
        })
        .collect()
}

fn parse_members(docs: &[Value]) -> Vec<ClusterMember> {
    docs.iter()
        .filter_map(|doc| {
            let address = doc
                .pointer("/spec/addresses")
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(Value::as_str)?
                .to_string();
            let machine_type = str_at(doc, "/spec/machineType");
            let role = machine_type.parse::<Role>().unwrap_or_else(|_| {
                warn!(member = %address, machine_type = %machine_type, "unrecognized machine type, assuming worker");
                Role::Worker
            });
            Some(ClusterMember {
                address,
                hostname: str_at(doc, "/spec/hostname"),
                role,
                machine_type,
            })
        })
        .collect()
}

fn node_ready_in_list(list: &Value, address: &str) -> bool {
    let Some(items) = list.get("items").and_then(Value::as_array) else {
        return false;
    };
    items
        .iter()
        .find(|item| {
            item.pointer("/status/addresses")
                .and_then(Value::as_array)
                .is_some_and(|addrs| {
                    addrs
                        .iter()
                        .any(|a| a.get("address").and_then(Value::as_str) == Some(address))
                })
        })
        .and_then(|item| item.pointer("/status/conditions").and_then(Value::as_array))
        .is_some_and(|conds| {
            conds.iter().any(|c| {
                c.get("type").and_then(Value::as_str) == Some("Ready")
                    && c.get("status").and_then(Value::as_str) == Some("True")
            })
        })
}

impl NodeStateProbe for TalosctlProbe {
    fn is_reachable<'a>(&'a self, address: &'a str) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move { self.query_version(address).await.is_ok() })
    }

    fn version<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, String> {
        Box::pin(self.query_version(address))
    }

    fn extensions<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, Vec<ExtensionInfo>> {
        Box::pin(async move {
            let docs = self.get(Some(address), "extensions").await?;
            Ok(parse_extensions(&docs))
        })
    }

    fn kernel_cmdline<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, String> {
        Box::pin(async move {
            let cmd = self.talosctl(Some(address), &["read", "/proc/cmdline"]);
            let out = self.run(cmd, "talosctl read /proc/cmdline").await?;
            Ok(out.trim().to_string())
        })
    }

    fn upgrade<'a>(&'a self, address: &'a str, image: &'a str, preserve: bool) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            let preserve = format!("--preserve={preserve}");
            let cmd = self.talosctl(
                Some(address),
                &["upgrade", "--image", image, preserve.as_str(), "--wait=false"],
            );
            self.run(cmd, "talosctl upgrade").await?;
            Ok(())
        })
    }

    fn watch_upgrade<'a>(&'a self, address: &'a str, tail: Tail) -> ProbeFuture<'a, EventStream> {
        Box::pin(async move { self.spawn_watch(address, tail) })
    }

    fn service_states<'a>(
        &'a self,
        address: &'a str,
        names: &'a [&'a str],
    ) -> ProbeFuture<'a, Vec<ServiceState>> {
        Box::pin(async move {
            let docs = self.get(Some(address), "services").await?;
            Ok(parse_services(&docs, names))
        })
    }

    fn static_workloads<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, Vec<StaticWorkload>> {
        Box::pin(async move {
            let docs = self.get(Some(address), "staticpodstatus").await?;
            Ok(parse_static_pods(&docs))
        })
    }

    fn node_ready<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, Option<bool>> {
        Box::pin(self.query_node_ready(address))
    }

    fn cluster_members(&self) -> ProbeFuture<'_, Vec<ClusterMember>> {
        Box::pin(async move {
            let docs = self.get(None, "members").await?;
            Ok(parse_members(&docs))
        })
    }

    fn hardware_info<'a>(&'a self, address: &'a str) -> ProbeFuture<'a, HardwareInfo> {
        Box::pin(self.query_hardware(address))
    }
}
