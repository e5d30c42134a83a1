use noderoll_core::CancelSignal;
use noderoll_rollout::{RolloutError, RolloutSummary, Target};

use super::App;
use crate::console;

/// A version starts with a digit and has at most two dots, which keeps
/// IPv4 addresses on the target side.
pub fn is_version(token: &str) -> bool {
    token.starts_with(|c: char| c.is_ascii_digit()) && token.matches('.').count() <= 2
}

/// Split up to two positional arguments into target and version, in either
/// order. The target defaults to `all`.
pub fn parse_args(args: &[String]) -> (Target, Option<String>) {
    match args {
        [] => (Target::All, None),
        [only] if is_version(only) => (Target::All, Some(only.clone())),
        [only] => (Target::parse(only), None),
        [first, second, ..] if is_version(first) => (Target::parse(second), Some(first.clone())),
        [first, second, ..] => (Target::parse(first), Some(second.clone())),
    }
}

pub async fn run(app: &App, args: &[String], cancel: &CancelSignal) -> anyhow::Result<()> {
    let (target, version) = parse_args(args);
    let version = app.version(version.as_deref()).await?;
    let controller = app.controller()?;

    let summary = match controller.execute(&target, &version, cancel).await {
        Ok(summary) => summary,
        Err(e) if stopped_before_nodes(&e) => {
            match &e {
                RolloutError::Aborted => println!("Aborted."),
                RolloutError::Cancelled => console::warn("Rollout cancelled"),
                other => console::error(other),
            }
            let summary = RolloutSummary {
                version,
                cancelled: matches!(e, RolloutError::Cancelled),
                final_status: controller.final_status().await,
                ..Default::default()
            };
            report(&summary);
            return match e {
                RolloutError::Aborted => Ok(()),
                e => Err(e.into()),
            };
        }
        Err(e) => return Err(e.into()),
    };

    report(&summary);
    if summary.cancelled {
        anyhow::bail!("rollout cancelled");
    }
    if summary.has_failures() {
        anyhow::bail!("{} node(s) failed to upgrade", summary.failed().len());
    }
    Ok(())
}

/// Errors raised after the target resolved but before any node was
/// processed. The cluster is still re-probed for these.
fn stopped_before_nodes(e: &RolloutError) -> bool {
    matches!(
        e,
        RolloutError::Aborted | RolloutError::Cancelled | RolloutError::ImageResolution { .. }
    )
}

fn report(summary: &RolloutSummary) {
    console::print_summary(summary);
    println!();
    console::print_status(&summary.final_status);
}
