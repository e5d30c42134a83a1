use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use noderoll_core::{Config, cancel_pair};
use tracing::info;

mod commands;
mod console;

#[derive(Parser)]
#[command(
    name = "noderoll",
    about = "Rolling OS upgrades for Talos clusters",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Config file (default: configs/noderoll.toml or noderoll.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Show what would be done without making changes
    #[arg(long, global = true, env = "DRY_RUN")]
    dry_run: bool,

    /// Target OS version (default: latest release)
    #[arg(short = 'V', long, global = true, env = "OS_VERSION")]
    os_version: Option<String>,

    /// Preserve ephemeral data across the upgrade (default from settings)
    #[arg(long, global = true, env = "PRESERVE")]
    preserve: Option<bool>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version and reachability of every node
    Status,
    /// Print factory URLs for each profile (for a browser)
    Urls {
        version: Option<String>,
    },
    /// Resolve installer images for each profile
    Images {
        version: Option<String>,
    },
    /// Upgrade nodes to a version.
    ///
    /// Target is one of: all (workers first, then control planes), workers,
    /// controlplanes, a profile name, or a node address. Arguments may be
    /// given in either order: `upgrade 1.9.5 workers` or
    /// `upgrade workers 1.9.5`.
    Upgrade {
        #[arg(num_args = 0..=2, value_name = "TARGET|VERSION")]
        args: Vec<String>,
    },
    /// Upgrade a single node by address
    UpgradeNode {
        address: String,
        version: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let globals = commands::Globals {
        dry_run: cli.dry_run,
        os_version: cli.os_version,
        preserve: cli.preserve,
    };
    let app = commands::App::new(config, globals);

    let (handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling");
            handle.cancel();
        }
    });

    match cli.command {
        Commands::Status => commands::status::run(&app).await,
        Commands::Urls { version } => commands::urls::run(&app, version.as_deref()).await,
        Commands::Images { version } => commands::images::run(&app, version.as_deref()).await,
        Commands::Upgrade { args } => commands::upgrade::run(&app, &args, &cancel).await,
        Commands::UpgradeNode { address, version } => {
            commands::upgrade_node::run(&app, &address, version.as_deref(), &cancel).await
        }
    }
}
