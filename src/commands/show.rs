//! Show command - displays information.

use anyhow::Result;
use std::path::Path;

use crate::config::Config;
use crate::mounts;
use crate::workspace::Workspace;

/// Show target for the show command.
pub enum ShowTarget {
    Config { json: bool },
    /// Which workspace artifacts exist, and any leftover mounts
    Status,
}

pub fn cmd_show(config: &Config, target: ShowTarget) -> Result<()> {
    match target {
        ShowTarget::Config { json: true } => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ShowTarget::Config { json: false } => config.print(),
        ShowTarget::Status => print_status(&Workspace::new(config))?,
    }
    Ok(())
}

fn present(path: &Path) -> &'static str {
    if path.exists() {
        "present"
    } else {
        "missing"
    }
}

fn print_status(ws: &Workspace) -> Result<()> {
    println!("Workspace: {}", ws.base_dir.display());
    for (label, path) in [
        ("Reference image", &ws.reference),
        ("Image tree", &ws.extract_dir),
        ("Live root", &ws.rootfs_dir),
        ("Final image", &ws.output),
    ] {
        println!("  {:16} {} [{}]", format!("{}:", label), path.display(), present(path));
    }

    let leftover = mounts::mounted_under(&ws.rootfs_dir)?;
    if leftover.is_empty() {
        println!("\nNo mounts under the live root.");
    } else {
        println!("\nStill mounted under the live root (run 'respin clean'):");
        for point in leftover {
            println!("  {}", point.display());
        }
    }
    Ok(())
}
