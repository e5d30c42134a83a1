use super::App;
use crate::console;

/// Resolve every profile's installer image. A failing profile is reported
/// and the rest are still attempted.
pub async fn run(app: &App, version: Option<&str>) -> anyhow::Result<()> {
    let version = app.version(version).await?;
    let factory = app.factory()?;

    console::header(format!("Installer Images for v{version}"));
    println!();
    println!("These are the installer images for 'talosctl upgrade --image <IMAGE>'");
    println!();

    let mut failures = 0usize;
    for (name, profile) in &app.config.profiles {
        console::sub_header(format!("Profile: {name}"));
        console::info("Fetching schematic ID from factory...");
        match factory.resolve_installer_image(profile, &version).await {
            Ok(image) => println!("  {image}"),
            Err(e) => {
                failures += 1;
                console::error(format!("Failed to get image for {name}: {e}"));
            }
        }
        println!();

        let nodes = app.config.nodes_by_profile(name);
        if !nodes.is_empty() {
            println!("  Nodes:");
            for node in nodes {
                println!("    - {} ({})", node.address, node.role);
            }
            println!();
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} profile(s) failed to resolve");
    }
    Ok(())
}
