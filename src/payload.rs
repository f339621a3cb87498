//! Copies the custom script and unit files into the mutable root.

use anyhow::Context;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::config::PayloadFile;
use crate::error::{BuildError, BuildResult};
use crate::workspace::MutableRoot;

/// Copy every payload file into the root. Returns the number copied.
pub fn inject_payload(base_dir: &Path, root: &MutableRoot, files: &[PayloadFile]) -> BuildResult<usize> {
    for file in files {
        let source = base_dir.join(&file.source);
        let dest = root.join(&file.dest);

        install_file(&source, &dest, file.executable).map_err(|cause| BuildError::Payload {
            source_path: source.clone(),
            dest: dest.clone(),
            cause,
        })?;

        println!("  Installed /{}", file.dest.display());
    }
    Ok(files.len())
}

fn install_file(source: &Path, dest: &Path, executable: bool) -> anyhow::Result<()> {
    if !source.is_file() {
        anyhow::bail!("source file does not exist");
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    // Never write through a link the image left at the destination.
    if fs::symlink_metadata(dest).is_ok_and(|m| m.file_type().is_symlink()) {
        fs::remove_file(dest)?;
    }
    fs::copy(source, dest).context("copy failed")?;

    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(dest, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to chmod {:o}", mode))?;
    Ok(())
}
