pub mod images;
pub mod status;
pub mod upgrade;
pub mod upgrade_node;
pub mod urls;

use std::sync::Arc;

use anyhow::Context;
use noderoll_core::{Config, Settings, SystemClock, strip_version_prefix};
use noderoll_factory::{FactoryClient, latest_release_version};
use noderoll_probe::{NodeStateProbe, TalosctlProbe};
use noderoll_rollout::{RolloutController, StdinConfirm, UpgradeContext, UpgradeOptions};

use crate::console::{self, ConsoleObserver};

/// Flags shared by every subcommand.
pub struct Globals {
    pub dry_run: bool,
    pub os_version: Option<String>,
    pub preserve: Option<bool>,
}

pub struct App {
    pub config: Arc<Config>,
    pub globals: Globals,
}

impl App {
    pub fn new(config: Config, globals: Globals) -> Self {
        Self {
            config: Arc::new(config),
            globals,
        }
    }

    pub fn probe(&self) -> Arc<dyn NodeStateProbe> {
        Arc::new(TalosctlProbe::new(&self.config.probe))
    }

    pub fn factory(&self) -> anyhow::Result<FactoryClient> {
        FactoryClient::new(&self.config.settings.factory_base_url).context("failed to create factory client")
    }

    pub fn options(&self) -> UpgradeOptions {
        let opts = UpgradeOptions::from_settings(&self.config.settings).dry_run(self.globals.dry_run);
        match self.globals.preserve {
            Some(preserve) => opts.preserve(preserve),
            None => opts,
        }
    }

    pub fn controller(&self) -> anyhow::Result<RolloutController> {
        let ctx = UpgradeContext::new(self.probe(), Arc::new(SystemClock), self.options());
        Ok(
            RolloutController::new(ctx, self.config.clone(), Arc::new(self.factory()?), Arc::new(StdinConfirm))
                .with_observer(Arc::new(ConsoleObserver::default())),
        )
    }

    /// Positional version, then `--os-version`, then the latest release,
    /// then the configured fallback.
    pub async fn version(&self, positional: Option<&str>) -> anyhow::Result<String> {
        let explicit = positional.or(self.globals.os_version.as_deref());
        let version = match explicit {
            Some(v) => v.to_string(),
            None => latest_or_fallback(&self.config.settings).await,
        };
        validate_version(&version)
    }
}

async fn latest_or_fallback(settings: &Settings) -> String {
    match latest_release_version(&settings.releases_url).await {
        Ok(version) => version,
        Err(e) => {
            console::warn(format!(
                "Failed to fetch latest version: {e}, using fallback {}",
                settings.fallback_version
            ));
            settings.fallback_version.clone()
        }
    }
}

/// Strip a leading `v` and require a semantic version.
pub fn validate_version(version: &str) -> anyhow::Result<String> {
    let version = strip_version_prefix(version.trim());
    semver::Version::parse(version).with_context(|| format!("invalid version {version:?}"))?;
    Ok(version.to_string())
}
