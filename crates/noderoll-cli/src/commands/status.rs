use anyhow::Context;
use noderoll_rollout::collect_status;

use super::App;
use crate::console;

pub async fn run(app: &App) -> anyhow::Result<()> {
    let statuses = collect_status(&app.config, app.probe())
        .await
        .context("failed to collect cluster status")?;
    console::print_status(&statuses);
    Ok(())
}
