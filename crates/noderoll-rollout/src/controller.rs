//! Rollout controller: sequences node upgrades and applies failure policy.
//!
//! Nodes are processed strictly one at a time in resolved order. Images are
//! resolved for every distinct profile before the first node is touched, so
//! a factory failure aborts the rollout with nothing modified.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use noderoll_core::{CancelSignal, Config, ImageResolver, Node, Role, UpgradeRequest};
use tracing::{info, warn};

use crate::confirm::{CONTINUE_PROMPT, Confirm, PROCEED_PROMPT};
use crate::diff::{NodeFacts, decide};
use crate::error::{RolloutError, RolloutResult, UpgradeError};
use crate::machine::{UpgradeContext, UpgradeMachine, UpgradeReport};
use crate::observer::{NoopObserver, RolloutObserver};
use crate::status::{NodeStatus, collect_status};
use crate::target::{Target, resolve, resolve_single};

/// What happened to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Already converged.
    Skipped,
    /// Dry run: would have been upgraded.
    Planned { detail: String },
    Succeeded(UpgradeReport),
    Failed(UpgradeError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeResult {
    pub node: Node,
    pub outcome: NodeOutcome,
}

/// Result of a rollout. Nodes abandoned after a halt or a cancellation do
/// not appear.
#[derive(Debug, Clone, Default)]
pub struct RolloutSummary {
    pub version: String,
    pub dry_run: bool,
    pub results: Vec<NodeResult>,
    /// Set when the operator declined to continue after a control-plane
    /// failure.
    pub halted: bool,
    /// Set when the rollout was interrupted while processing nodes.
    pub cancelled: bool,
    /// Cluster status re-probed after the last node.
    pub final_status: Vec<NodeStatus>,
}

impl RolloutSummary {
    fn bucket<'s, T>(&'s self, f: impl Fn(&'s NodeResult) -> Option<T> + 's) -> Vec<T> {
        self.results.iter().filter_map(f).collect()
    }

    pub fn skipped(&self) -> Vec<&Node> {
        self.bucket(|r| matches!(r.outcome, NodeOutcome::Skipped).then_some(&r.node))
    }

    pub fn planned(&self) -> Vec<&Node> {
        self.bucket(|r| matches!(r.outcome, NodeOutcome::Planned { .. }).then_some(&r.node))
    }

    pub fn succeeded(&self) -> Vec<&Node> {
        self.bucket(|r| matches!(r.outcome, NodeOutcome::Succeeded(_)).then_some(&r.node))
    }

    pub fn failed(&self) -> Vec<(&Node, &UpgradeError)> {
        self.bucket(|r| match &r.outcome {
            NodeOutcome::Failed(e) => Some((&r.node, e)),
            _ => None,
        })
    }

    pub fn has_failures(&self) -> bool {
        self.results.iter().any(|r| matches!(r.outcome, NodeOutcome::Failed(_)))
    }
}

pub struct RolloutController {
    ctx: UpgradeContext,
    config: Arc<Config>,
    resolver: Arc<dyn ImageResolver>,
    confirm: Arc<dyn Confirm>,
    observer: Arc<dyn RolloutObserver>,
}

impl RolloutController {
    pub fn new(
        ctx: UpgradeContext,
        config: Arc<Config>,
        resolver: Arc<dyn ImageResolver>,
        confirm: Arc<dyn Confirm>,
    ) -> Self {
        Self {
            ctx,
            config,
            resolver,
            confirm,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RolloutObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn context(&self) -> &UpgradeContext {
        &self.ctx
    }

    /// Resolve the target, run the rollout, then re-probe the cluster. A
    /// cancellation once nodes are being processed still yields a summary,
    /// marked `cancelled`.
    pub async fn execute(&self, target: &Target, version: &str, cancel: &CancelSignal) -> RolloutResult<RolloutSummary> {
        let nodes = resolve(&self.config, self.ctx.probe.as_ref(), target).await?;
        info!(target = %target, nodes = nodes.len(), version, "resolved rollout target");

        let mut summary = self.run(&nodes, version, cancel).await?;
        summary.final_status = self.final_status().await;
        Ok(summary)
    }

    /// Roll an already-ordered node list to `version`.
    pub async fn run(&self, nodes: &[Node], version: &str, cancel: &CancelSignal) -> RolloutResult<RolloutSummary> {
        let dry_run = self.ctx.options.dry_run;
        self.observer.plan(nodes, version, dry_run);

        if !dry_run && !cancel.guard(self.confirm.confirm(PROCEED_PROMPT)).await? {
            info!("rollout declined by operator");
            return Err(RolloutError::Aborted);
        }

        let images = self.resolve_images(nodes, version, cancel).await?;

        let mut summary = RolloutSummary {
            version: version.to_string(),
            dry_run,
            ..Default::default()
        };
        let total = nodes.len();

        for (index, node) in nodes.iter().enumerate() {
            self.observer.node_started(node, index + 1, total);
            let image = images
                .get(&node.profile)
                .ok_or_else(|| unknown_profile(node))?;
            let outcome = match self.process_node(node, image, version, cancel).await {
                Ok(outcome) => outcome,
                Err(RolloutError::Cancelled) => {
                    warn!(node = %node.address, remaining = total - index, "rollout cancelled");
                    summary.cancelled = true;
                    break;
                }
                Err(e) => return Err(e),
            };
            self.observer.node_finished(node, &outcome);

            let halt = match &outcome {
                NodeOutcome::Failed(e) if node.role == Role::ControlPlane && !dry_run => {
                    warn!(node = %node.address, error = %e, "control plane upgrade failed");
                    match cancel.guard(self.confirm.confirm(CONTINUE_PROMPT)).await {
                        Ok(proceed) => !proceed,
                        Err(_) => {
                            summary.cancelled = true;
                            true
                        }
                    }
                }
                NodeOutcome::Failed(e) => {
                    warn!(node = %node.address, error = %e, "worker upgrade failed, continuing");
                    false
                }
                _ => false,
            };

            summary.results.push(NodeResult {
                node: node.clone(),
                outcome,
            });

            if summary.cancelled {
                warn!(remaining = total - index - 1, "rollout cancelled");
                break;
            }
            if halt {
                info!(remaining = total - index - 1, "rollout halted by operator");
                summary.halted = true;
                break;
            }
        }

        info!(
            skipped = summary.skipped().len(),
            succeeded = summary.succeeded().len(),
            failed = summary.failed().len(),
            halted = summary.halted,
            cancelled = summary.cancelled,
            "rollout finished"
        );
        Ok(summary)
    }

    /// Upgrade one node without the pre-rollout confirmation.
    pub async fn upgrade_single(&self, address: &str, version: &str, cancel: &CancelSignal) -> RolloutResult<NodeResult> {
        let node = resolve_single(&self.config, self.ctx.probe.as_ref(), address).await?;
        let nodes = std::slice::from_ref(&node);
        self.observer.plan(nodes, version, self.ctx.options.dry_run);

        let images = self.resolve_images(nodes, version, cancel).await?;
        let image = images
            .get(&node.profile)
            .ok_or_else(|| unknown_profile(&node))?;

        self.observer.node_started(&node, 1, 1);
        let outcome = self.process_node(&node, image, version, cancel).await?;
        self.observer.node_finished(&node, &outcome);
        Ok(NodeResult { node, outcome })
    }

    /// One installer image per distinct profile, in profile-name order.
    pub async fn resolve_images(
        &self,
        nodes: &[Node],
        version: &str,
        cancel: &CancelSignal,
    ) -> RolloutResult<BTreeMap<String, String>> {
        let profiles: BTreeSet<&str> = nodes.iter().map(|n| n.profile.as_str()).collect();
        let mut images = BTreeMap::new();

        for name in profiles {
            let profile = self.config.profile(name).ok_or_else(|| {
                let node = nodes.iter().find(|n| n.profile == name);
                RolloutError::UnknownProfile {
                    address: node.map(|n| n.address.clone()).unwrap_or_default(),
                    profile: name.to_string(),
                }
            })?;

            self.observer.resolving_image(name);
            let image = cancel
                .guard(self.resolver.installer_image(profile, version))
                .await?
                .map_err(|source| RolloutError::ImageResolution {
                    profile: name.to_string(),
                    source,
                })?;
            info!(profile = %name, image = %image, "resolved installer image");
            self.observer.image_resolved(name, &image);
            images.insert(name.to_string(), image);
        }
        Ok(images)
    }

    async fn process_node(
        &self,
        node: &Node,
        image: &str,
        version: &str,
        cancel: &CancelSignal,
    ) -> RolloutResult<NodeOutcome> {
        cancel.check()?;
        let profile = self.config.profile(&node.profile).ok_or_else(|| unknown_profile(node))?;
        let req = UpgradeRequest::new(node.clone(), profile, image, version);

        let facts = cancel
            .guard(NodeFacts::gather(self.ctx.probe.as_ref(), &node.address))
            .await?;
        let decision = decide(&facts, &req);
        self.observer.node_decision(node, &facts, &decision, image);

        if decision.skip {
            info!(node = %node.address, version, "already converged, skipping");
            return Ok(NodeOutcome::Skipped);
        }

        if self.ctx.options.dry_run {
            info!(node = %node.address, image, "dry run, not upgrading");
            self.observer.would_upgrade(node, image, self.ctx.options.preserve);
            return Ok(NodeOutcome::Planned {
                detail: decision.detail,
            });
        }

        info!(
            node = %node.address,
            role = %node.role,
            from = facts.version_or_unknown(),
            to = version,
            "upgrading node"
        );
        let mut machine = UpgradeMachine::new(&self.ctx, node, self.observer.as_ref(), cancel);
        match machine.run(&req, facts.version_or_unknown()).await {
            Ok(report) => Ok(NodeOutcome::Succeeded(report)),
            Err(UpgradeError::Cancelled) => Err(RolloutError::Cancelled),
            Err(e) => Ok(NodeOutcome::Failed(e)),
        }
    }

    pub async fn final_status(&self) -> Vec<NodeStatus> {
        match collect_status(&self.config, self.ctx.probe.clone()).await {
            Ok(status) => status,
            Err(e) => {
                warn!(error = %e, "final status collection failed");
                Vec::new()
            }
        }
    }
}

fn unknown_profile(node: &Node) -> RolloutError {
    RolloutError::UnknownProfile {
        address: node.address.clone(),
        profile: node.profile.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ScriptedConfirm;
    use crate::options::UpgradeOptions;
    use noderoll_core::{ManualClock, Profile};
    use noderoll_probe::{Call, FakeNode, FakeProbe};
    use std::future::Future;
    use std::pin::Pin;

    struct StaticImages;

    impl ImageResolver for StaticImages {
        fn installer_image<'a>(
            &'a self,
            _profile: &'a Profile,
            version: &'a str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
            Box::pin(async move { Ok(format!("factory.test/installer/abc:v{version}")) })
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.profiles.insert(
            "p".into(),
            Profile {
                arch: "amd64".into(),
                platform: "metal".into(),
                ..Default::default()
            },
        );
        config.nodes = vec![
            Node::new("10.0.0.2", Role::Worker, "p"),
            Node::new("10.0.0.1", Role::ControlPlane, "p"),
        ];
        config
    }

    fn controller(probe: FakeProbe, dry_run: bool, answers: &[bool]) -> (Arc<FakeProbe>, Arc<ScriptedConfirm>, RolloutController) {
        let probe = Arc::new(probe);
        let confirm = Arc::new(ScriptedConfirm::new(answers.iter().copied()));
        let ctx = UpgradeContext::new(
            probe.clone(),
            Arc::new(ManualClock::new()),
            UpgradeOptions::default().dry_run(dry_run),
        );
        let controller = RolloutController::new(ctx, Arc::new(config()), Arc::new(StaticImages), confirm.clone());
        (probe, confirm, controller)
    }

    #[tokio::test]
    async fn declined_confirmation_touches_nothing() {
        let fake = FakeProbe::new()
            .with_node("10.0.0.1", FakeNode::at_version("1.9.5"))
            .with_node("10.0.0.2", FakeNode::at_version("1.9.5"));
        let (probe, confirm, controller) = controller(fake, false, &[false]);

        let err = controller
            .execute(&Target::All, "1.10.0", &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::Aborted));
        assert_eq!(confirm.prompts(), vec![PROCEED_PROMPT.to_string()]);
        assert!(probe.upgraded().is_empty());
    }

    #[tokio::test]
    async fn dry_run_plans_without_upgrading() {
        let fake = FakeProbe::new()
            .with_node("10.0.0.1", FakeNode::at_version("1.10.0"))
            .with_node("10.0.0.2", FakeNode::at_version("1.9.5"));
        let (probe, confirm, controller) = controller(fake, true, &[]);

        let summary = controller
            .execute(&Target::All, "1.10.0", &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(summary.planned().len(), 1);
        assert_eq!(summary.skipped().len(), 1);
        assert!(confirm.prompts().is_empty());
        assert_eq!(probe.count(|c| matches!(c, Call::Upgrade { .. })), 0);
        assert_eq!(summary.final_status.len(), 2);
    }

    #[tokio::test]
    async fn single_node_skips_confirmation() {
        let fake = FakeProbe::new().with_node("10.0.0.1", FakeNode::at_version("1.9.5").upgrades_to("1.10.0"));
        let (probe, confirm, controller) = controller(fake, false, &[]);

        let result = controller
            .upgrade_single("10.0.0.1", "1.10.0", &CancelSignal::never())
            .await
            .unwrap();
        assert!(matches!(result.outcome, NodeOutcome::Succeeded(_)));
        assert!(confirm.prompts().is_empty());
        assert_eq!(probe.upgraded(), vec!["10.0.0.1".to_string()]);
    }
}
