use noderoll_core::CancelSignal;
use noderoll_rollout::{NodeOutcome, RolloutError};

use super::App;
use crate::console;

pub async fn run(app: &App, address: &str, version: Option<&str>, cancel: &CancelSignal) -> anyhow::Result<()> {
    let version = app.version(version).await?;
    let controller = app.controller()?;

    let result = match controller.upgrade_single(address, &version, cancel).await {
        Ok(result) => result,
        Err(e @ (RolloutError::Cancelled | RolloutError::ImageResolution { .. })) => {
            console::error(&e);
            println!();
            console::print_status(&controller.final_status().await);
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };
    println!();
    if matches!(result.outcome, NodeOutcome::Planned { .. }) {
        console::warn("Dry run complete; no changes made");
    }

    console::print_status(&controller.final_status().await);

    if let NodeOutcome::Failed(e) = result.outcome {
        anyhow::bail!("upgrade of {address} failed: {e}");
    }
    Ok(())
}
