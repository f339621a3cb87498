//! Download command - fetches the reference image.

use anyhow::Result;

use crate::config::Config;
use crate::download;
use crate::workspace::Workspace;

pub fn cmd_download(config: &Config) -> Result<()> {
    let ws = Workspace::new(config);
    let reference = download::acquire_reference(&ws, &config.image_url)?;
    println!("Reference image: {}", reference.path.display());
    Ok(())
}
