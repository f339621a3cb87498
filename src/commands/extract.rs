//! Extract command - unpacks the reference image for inspection.

use anyhow::Result;

use crate::clean;
use crate::config::Config;
use crate::download;
use crate::extract;
use crate::workspace::Workspace;

/// Reset the workspace, then unpack the image and its live root.
///
/// Stops before anything is modified, so the result matches the reference.
pub fn cmd_extract(config: &Config) -> Result<()> {
    let ws = Workspace::new(config);
    clean::reset_workspace(&ws)?;

    let reference = download::acquire_reference(&ws, &config.image_url)?;
    let tree = extract::locate_archive(extract::extract_image(&ws, &reference)?)?;
    let root = extract::extract_rootfs(&ws, &tree)?;

    println!("\nExtracted:");
    println!("  Image tree: {}", tree.root.display());
    println!("  Archive:    {}", tree.archive.display());
    println!("  Live root:  {}", root.path.display());
    Ok(())
}
