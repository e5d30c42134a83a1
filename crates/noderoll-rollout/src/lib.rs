//! noderoll rolling upgrades.
//!
//! Nodes are upgraded one at a time, workers before control planes. Each
//! node is compared against its profile first and skipped when already
//! converged; otherwise a per-node state machine issues the upgrade,
//! follows the event stream across the reboot, and verifies role health.
//!
//! # Components
//!
//! - **`target`** — inventory, discovery, and target filtering
//! - **`diff`** — convergence decision (version, extensions, kernel args)
//! - **`machine`** — per-node upgrade state machine
//! - **`controller`** — sequential rollout with failure policy
//! - **`status`** — parallel read-only cluster status

pub mod confirm;
pub mod controller;
pub mod diff;
pub mod error;
pub mod machine;
pub mod observer;
pub mod options;
pub mod status;
pub mod target;

pub use confirm::{CONTINUE_PROMPT, Confirm, PROCEED_PROMPT, ScriptedConfirm, StdinConfirm};
pub use controller::{NodeOutcome, NodeResult, RolloutController, RolloutSummary};
pub use diff::{Decision, NodeFacts, decide};
pub use error::{RolloutError, RolloutResult, UpgradeError, UpgradeResult};
pub use machine::{Completion, UpgradeContext, UpgradeMachine, UpgradeReport, UpgradeState};
pub use observer::{HealthCheck, NoopObserver, RolloutObserver};
pub use options::UpgradeOptions;
pub use status::{NodeStatus, collect_status};
pub use target::{DiscoveryMode, Target, UNKNOWN_PROFILE};
