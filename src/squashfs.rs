//! Repackaging of the mutable root into the image's squashfs.

use anyhow::Context;
use std::fs;

use crate::clean;
use crate::error::{BuildError, BuildResult};
use crate::process::Cmd;
use crate::workspace::{LocatedTree, MutableRoot};

/// xz is what Debian live images ship; every live kernel can read it.
pub const SQUASHFS_COMPRESSION: &str = "xz";
pub const SQUASHFS_BLOCK_SIZE: &str = "1M";

/// Replace the archive inside `tree` with a fresh one built from `root`.
pub fn repackage(root: &MutableRoot, tree: &LocatedTree) -> BuildResult<()> {
    // A live bind would pack host /dev, /proc and /sys into the image.
    clean::ensure_unmounted(&root.path).map_err(|e| BuildError::Repackage {
        cause: anyhow::Error::new(e),
    })?;

    create_squashfs(root, tree).map_err(|cause| BuildError::Repackage { cause })
}

fn create_squashfs(root: &MutableRoot, tree: &LocatedTree) -> anyhow::Result<()> {
    println!(
        "Creating squashfs with {} compression...",
        SQUASHFS_COMPRESSION
    );

    fs::remove_file(&tree.archive)
        .with_context(|| format!("Failed to remove {}", tree.archive.display()))?;

    Cmd::new("mksquashfs")
        .arg_path(&root.path)
        .arg_path(&tree.archive)
        .args(["-comp", SQUASHFS_COMPRESSION])
        .args(["-b", SQUASHFS_BLOCK_SIZE])
        .arg("-noappend")
        .error_msg("mksquashfs failed")
        .run_interactive()?;

    // live-boot reads filesystem.size to size the overlay; keep it accurate.
    let size_file = tree.archive.with_extension("size");
    if size_file.exists() {
        let bytes = du_bytes(root)?;
        fs::write(&size_file, format!("{}\n", bytes))
            .with_context(|| format!("Failed to update {}", size_file.display()))?;
    }

    let metadata = fs::metadata(&tree.archive)?;
    println!("Squashfs created: {} MB", metadata.len() / 1024 / 1024);
    Ok(())
}

/// Apparent size of the root in bytes.
fn du_bytes(root: &MutableRoot) -> anyhow::Result<u64> {
    let result = Cmd::new("du")
        .args(["-sx", "--block-size=1"])
        .arg_path(&root.path)
        .run()?;
    result
        .stdout_trimmed()
        .split_whitespace()
        .next()
        .and_then(|n| n.parse().ok())
        .context("Could not parse du output")
}
