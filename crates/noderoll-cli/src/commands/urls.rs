use noderoll_factory::factory_url;

use super::App;
use crate::console;

pub async fn run(app: &App, version: Option<&str>) -> anyhow::Result<()> {
    let version = app.version(version).await?;
    let settings = &app.config.settings;

    console::header(format!("Factory URLs for v{version}"));
    println!();
    println!("Open these URLs in a browser to download images or get installer commands.");
    println!();

    for (name, profile) in &app.config.profiles {
        console::sub_header(format!("Profile: {name}"));
        println!("  Arch: {}, Secureboot: {}", profile.arch, profile.secureboot);
        if let Some(overlay) = &profile.overlay {
            println!("  Overlay: {}", overlay.name);
        }
        if !profile.kernel_args.is_empty() {
            println!("  Kernel Args: {}", profile.kernel_args.join(" "));
        }
        println!("  Extensions: {}", profile.extensions.join(", "));
        println!();

        let url = factory_url(profile, &version, &settings.factory_base_url)?;
        println!("  URL:\n{url}");
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
    Ok(())
}
