//! End-to-end rollout scenarios against the in-memory probe.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use noderoll_core::{CancelHandle, CancelSignal, Config, ImageResolver, ManualClock, Node, Profile, Role, cancel_pair};
use noderoll_probe::{Call, FakeNode, FakeProbe};
use noderoll_rollout::{
    CONTINUE_PROMPT, Decision, NodeFacts, NodeOutcome, PROCEED_PROMPT, RolloutController, RolloutError,
    RolloutObserver, ScriptedConfirm, Target, UpgradeContext, UpgradeError, UpgradeOptions,
};

const VERSION: &str = "1.10.0";

struct Factory {
    failing: Option<&'static str>,
    calls: Mutex<Vec<String>>,
}

impl Factory {
    fn ok() -> Self {
        Self {
            failing: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing(profile: &'static str) -> Self {
        Self {
            failing: Some(profile),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ImageResolver for Factory {
    fn installer_image<'a>(
        &'a self,
        profile: &'a Profile,
        version: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let name = profile.description.clone().unwrap_or_default();
            self.calls.lock().unwrap().push(name.clone());
            if self.failing == Some(name.as_str()) {
                anyhow::bail!("factory returned 500 Internal Server Error");
            }
            Ok(format!("factory.test/installer/{name}:v{version}"))
        })
    }
}

#[derive(Default)]
struct Recorder {
    decisions: Mutex<Vec<(String, Decision)>>,
    cancel_after_first: Mutex<Option<CancelHandle>>,
}

impl RolloutObserver for Recorder {
    fn node_decision(&self, node: &Node, _facts: &NodeFacts, decision: &Decision, _image: &str) {
        self.decisions
            .lock()
            .unwrap()
            .push((node.address.clone(), decision.clone()));
    }

    fn node_finished(&self, _node: &Node, _outcome: &NodeOutcome) {
        if let Some(handle) = self.cancel_after_first.lock().unwrap().take() {
            handle.cancel();
        }
    }
}

fn profile(name: &str, extensions: &[&str]) -> Profile {
    Profile {
        description: Some(name.to_string()),
        arch: "amd64".into(),
        platform: "metal".into(),
        extensions: extensions.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

/// Two workers and two control planes, listed out of address order.
fn cluster_config() -> Config {
    let mut config = Config::default();
    config.profiles.insert("intel".into(), profile("intel", &[]));
    config.profiles.insert("rpi".into(), profile("rpi", &[]));
    config.nodes = vec![
        Node::new("10.0.0.11", Role::ControlPlane, "intel"),
        Node::new("10.0.0.20", Role::Worker, "rpi"),
        Node::new("10.0.0.3", Role::Worker, "rpi"),
        Node::new("10.0.0.2", Role::ControlPlane, "intel"),
    ];
    config
}

fn cluster_probe(version: &str) -> FakeProbe {
    let probe = FakeProbe::new();
    for addr in ["10.0.0.2", "10.0.0.3", "10.0.0.11", "10.0.0.20"] {
        probe.insert(addr, FakeNode::at_version(version).upgrades_to(VERSION));
    }
    probe
}

struct Harness {
    probe: Arc<FakeProbe>,
    confirm: Arc<ScriptedConfirm>,
    factory: Arc<Factory>,
    recorder: Arc<Recorder>,
    controller: RolloutController,
}

fn harness(config: Config, probe: FakeProbe, factory: Factory, answers: &[bool]) -> Harness {
    let probe = Arc::new(probe);
    let confirm = Arc::new(ScriptedConfirm::new(answers.iter().copied()));
    let factory = Arc::new(factory);
    let recorder = Arc::new(Recorder::default());
    let ctx = UpgradeContext::new(probe.clone(), Arc::new(ManualClock::new()), UpgradeOptions::default());
    let controller = RolloutController::new(ctx, Arc::new(config), factory.clone(), confirm.clone())
        .with_observer(recorder.clone());
    Harness {
        probe,
        confirm,
        factory,
        recorder,
        controller,
    }
}

#[tokio::test]
async fn full_cluster_upgrades_workers_first_in_address_order() {
    let h = harness(cluster_config(), cluster_probe("1.9.5"), Factory::ok(), &[true]);

    let summary = h
        .controller
        .execute(&Target::All, VERSION, &CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(h.probe.upgraded(), vec!["10.0.0.3", "10.0.0.20", "10.0.0.2", "10.0.0.11"]);
    assert_eq!(summary.skipped().len(), 0);
    assert_eq!(summary.failed().len(), 0);
    assert_eq!(summary.succeeded().len(), 4);
    assert!(!summary.halted);

    // Only control planes wait on the static workloads.
    assert_eq!(h.probe.count(|c| matches!(c, Call::Workloads(_))), 2);
    assert_eq!(h.probe.count(|c| matches!(c, Call::Services(_))), 4);

    // One image per distinct profile, resolved in name order.
    assert_eq!(*h.factory.calls.lock().unwrap(), vec!["intel", "rpi"]);
    assert_eq!(h.confirm.prompts(), vec![PROCEED_PROMPT.to_string()]);

    assert_eq!(summary.final_status.len(), 4);
    assert!(summary.final_status.iter().all(|s| s.version.as_deref() == Some(VERSION)));
}

#[tokio::test]
async fn second_run_skips_every_node() {
    let h = harness(cluster_config(), cluster_probe("1.9.5"), Factory::ok(), &[true, true]);
    let cancel = CancelSignal::never();

    h.controller.execute(&Target::All, VERSION, &cancel).await.unwrap();
    let first = h.probe.upgraded().len();

    let summary = h.controller.execute(&Target::All, VERSION, &cancel).await.unwrap();
    assert_eq!(summary.skipped().len(), 4);
    assert_eq!(h.probe.upgraded().len(), first);
}

#[tokio::test]
async fn matching_version_with_missing_extension_is_upgraded() {
    let mut config = Config::default();
    config
        .profiles
        .insert("gpu".into(), profile("gpu", &["vendor/gpu-driver"]));
    config.nodes = vec![Node::new("10.0.0.7", Role::Worker, "gpu")];
    let probe = FakeProbe::new().with_node("10.0.0.7", FakeNode::at_version(VERSION));
    let h = harness(config, probe, Factory::ok(), &[true]);

    let summary = h
        .controller
        .execute(&Target::All, VERSION, &CancelSignal::never())
        .await
        .unwrap();

    let decisions = h.recorder.decisions.lock().unwrap().clone();
    assert_eq!(decisions.len(), 1);
    assert!(!decisions[0].1.skip);
    assert!(decisions[0].1.version_matches);
    assert!(decisions[0].1.detail.contains("missing: gpu-driver"));
    assert_eq!(h.probe.upgraded(), vec!["10.0.0.7"]);
    assert_eq!(summary.succeeded().len(), 1);
}

fn mixed_config() -> Config {
    let mut config = Config::default();
    config.profiles.insert("mixed".into(), profile("mixed", &[]));
    config.nodes = vec![
        Node::new("10.0.0.1", Role::ControlPlane, "mixed"),
        Node::new("10.0.0.2", Role::Worker, "mixed"),
        Node::new("10.0.0.3", Role::ControlPlane, "mixed"),
    ];
    config
}

fn mixed_probe(failing: &str, reason: &str) -> FakeProbe {
    let probe = FakeProbe::new();
    for addr in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
        let mut node = FakeNode::at_version("1.9.5").upgrades_to(VERSION);
        if addr == failing {
            node.upgrade_error = Some(reason.to_string());
        }
        probe.insert(addr, node);
    }
    probe
}

#[tokio::test]
async fn declined_continuation_after_control_plane_failure_halts() {
    let probe = mixed_probe("10.0.0.1", "resource exhausted");
    let h = harness(mixed_config(), probe, Factory::ok(), &[true, false]);

    let summary = h
        .controller
        .execute(&Target::parse("mixed"), VERSION, &CancelSignal::never())
        .await
        .unwrap();

    assert!(summary.halted);
    assert_eq!(h.probe.upgraded(), vec!["10.0.0.1"]);
    assert_eq!(summary.results.len(), 1);
    let failed = summary.failed();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0.address, "10.0.0.1");
    assert!(matches!(failed[0].1, UpgradeError::CommandRejected(r) if r.contains("resource exhausted")));
    assert_eq!(
        h.confirm.prompts(),
        vec![PROCEED_PROMPT.to_string(), CONTINUE_PROMPT.to_string()]
    );
    // Remaining nodes are neither probed nor recorded.
    assert_eq!(h.probe.count(|c| matches!(c, Call::Extensions(a) if a == "10.0.0.2")), 0);
}

#[tokio::test]
async fn accepted_continuation_processes_remaining_nodes() {
    let probe = mixed_probe("10.0.0.1", "upgrade already in progress");
    let h = harness(mixed_config(), probe, Factory::ok(), &[true, true]);

    let summary = h
        .controller
        .execute(&Target::parse("mixed"), VERSION, &CancelSignal::never())
        .await
        .unwrap();

    assert!(!summary.halted);
    assert_eq!(h.probe.upgraded(), vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    assert_eq!(summary.failed().len(), 1);
    assert_eq!(summary.succeeded().len(), 2);
}

#[tokio::test]
async fn worker_failure_never_prompts() {
    let probe = mixed_probe("10.0.0.2", "disk full");
    let h = harness(mixed_config(), probe, Factory::ok(), &[true]);

    let summary = h
        .controller
        .execute(&Target::All, VERSION, &CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(h.probe.upgraded(), vec!["10.0.0.2", "10.0.0.1", "10.0.0.3"]);
    assert_eq!(summary.failed().len(), 1);
    assert_eq!(summary.succeeded().len(), 2);
    assert_eq!(h.confirm.prompts(), vec![PROCEED_PROMPT.to_string()]);
}

#[tokio::test]
async fn image_failure_aborts_before_any_node() {
    let h = harness(cluster_config(), cluster_probe("1.9.5"), Factory::failing("rpi"), &[true]);

    let err = h
        .controller
        .execute(&Target::All, VERSION, &CancelSignal::never())
        .await
        .unwrap_err();

    match err {
        RolloutError::ImageResolution { profile, .. } => assert_eq!(profile, "rpi"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.probe.upgraded().is_empty());
    assert!(h.recorder.decisions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn dry_run_probes_but_never_upgrades() {
    let probe = Arc::new(cluster_probe("1.9.5"));
    let ctx = UpgradeContext::new(
        probe.clone(),
        Arc::new(ManualClock::new()),
        UpgradeOptions::default().dry_run(true),
    );
    let confirm = Arc::new(ScriptedConfirm::default());
    let controller = RolloutController::new(ctx, Arc::new(cluster_config()), Arc::new(Factory::ok()), confirm.clone());

    let summary = controller
        .execute(&Target::Workers, VERSION, &CancelSignal::never())
        .await
        .unwrap();

    assert_eq!(summary.planned().len(), 2);
    assert!(probe.upgraded().is_empty());
    assert_eq!(probe.count(|c| matches!(c, Call::Services(_))), 0);
    assert!(confirm.prompts().is_empty());
}

#[tokio::test]
async fn cancellation_between_nodes_stops_the_rollout() {
    let h = harness(cluster_config(), cluster_probe("1.9.5"), Factory::ok(), &[true]);
    let (handle, cancel) = cancel_pair();
    *h.recorder.cancel_after_first.lock().unwrap() = Some(handle);

    let summary = h.controller.execute(&Target::All, VERSION, &cancel).await.unwrap();

    assert!(summary.cancelled);
    assert!(!summary.halted);
    assert_eq!(h.probe.upgraded(), vec!["10.0.0.3"]);
    let upgraded: Vec<&str> = summary.succeeded().iter().map(|n| n.address.as_str()).collect();
    assert_eq!(upgraded, vec!["10.0.0.3"]);
    assert_eq!(summary.results.len(), 1);

    // The cluster is still re-probed after an interrupted rollout.
    assert_eq!(summary.final_status.len(), 4);
    let first = summary.final_status.iter().find(|s| s.address == "10.0.0.3").unwrap();
    assert_eq!(first.version.as_deref(), Some(VERSION));
}

#[tokio::test]
async fn unknown_target_fails_before_prompting() {
    let h = harness(cluster_config(), cluster_probe("1.9.5"), Factory::ok(), &[true]);

    let err = h
        .controller
        .execute(&Target::parse("10.9.9.9"), VERSION, &CancelSignal::never())
        .await
        .unwrap_err();

    assert!(matches!(err, RolloutError::UnknownTarget(_)));
    assert!(h.confirm.prompts().is_empty());
}
