//! Run-time knobs for one rollout.

use std::time::Duration;

use noderoll_core::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeOptions {
    pub dry_run: bool,
    /// Keep ephemeral data across the upgrade.
    pub preserve: bool,
    /// Overall per-node budget for streaming and reconnecting.
    pub node_timeout: Duration,
    pub service_timeout: Duration,
    pub workload_timeout: Duration,
    pub health_poll: Duration,
    pub reconnect_poll: Duration,
    /// Budget for the post-reboot event tail.
    pub reconnect_window: Duration,
    /// Events replayed when re-subscribing after a reboot.
    pub reconnect_tail: usize,
}

impl UpgradeOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            dry_run: false,
            preserve: settings.default_preserve,
            node_timeout: Duration::from_secs(settings.default_timeout_secs),
            service_timeout: Duration::from_secs(settings.service_timeout_secs),
            workload_timeout: Duration::from_secs(settings.workload_timeout_secs),
            health_poll: Duration::from_secs(settings.health_poll_secs),
            reconnect_poll: Duration::from_secs(settings.reconnect_poll_secs),
            reconnect_window: Duration::from_secs(settings.reconnect_window_secs),
            reconnect_tail: 10,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn preserve(mut self, preserve: bool) -> Self {
        self.preserve = preserve;
        self
    }
}

impl Default for UpgradeOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}
