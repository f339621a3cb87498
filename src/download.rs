//! Reference image acquisition.
//!
//! The cache is trust-on-presence: if a file with the expected name exists it
//! is used as-is, without any checksum.

use anyhow::Context;
use std::fs;

use crate::error::{BuildError, BuildResult};
use crate::process::Cmd;
use crate::workspace::{ReferenceImage, Workspace};

/// Fetch the reference image unless it is already cached.
pub fn acquire_reference(ws: &Workspace, url: &str) -> BuildResult<ReferenceImage> {
    if ws.reference.exists() {
        println!("Reference image already cached at {}", ws.reference.display());
        return Ok(ReferenceImage {
            path: ws.reference.clone(),
        });
    }

    fetch(ws, url).map_err(|cause| BuildError::Acquisition {
        url: url.to_string(),
        cause,
    })?;

    Ok(ReferenceImage {
        path: ws.reference.clone(),
    })
}

/// Download into `<name>.part` and rename, so an interrupted fetch never
/// looks like a cached image.
fn fetch(ws: &Workspace, url: &str) -> anyhow::Result<()> {
    let mut part_name = ws
        .reference
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    part_name.push(".part");
    let part = ws.reference.with_file_name(part_name);

    println!("Downloading reference image...");
    println!("URL: {}", url);

    let result = Cmd::new("curl")
        .args(["-fL", "--progress-bar", "-o"])
        .arg_path(&part)
        .arg(url)
        .error_msg("curl failed")
        .run_interactive();

    if let Err(e) = result {
        let _ = fs::remove_file(&part);
        return Err(e);
    }

    fs::rename(&part, &ws.reference).with_context(|| {
        format!(
            "Failed to move {} to {}",
            part.display(),
            ws.reference.display()
        )
    })?;

    println!("Downloaded to {}", ws.reference.display());
    Ok(())
}
