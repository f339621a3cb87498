//! Workspace reset and artifact cleaning.
//!
//! A previous run may have died with host pseudo-filesystems still bound into
//! the mutable root. Those are detached first; a recursive delete through a
//! live `/dev` bind would delete host device nodes.

use anyhow::Context;
use std::fs;
use std::io;
use std::path::Path;

use crate::error::{BuildError, BuildResult};
use crate::mounts;
use crate::workspace::Workspace;

/// Bring the workspace back to a clean starting state.
///
/// Safe on an empty workspace. Unmount failures are only logged; removal of
/// an already-absent target is not an error. Nothing is deleted unless the
/// mount table could be read and shows nothing mounted under the root.
pub fn reset_workspace(ws: &Workspace) -> BuildResult<()> {
    reset_workspace_with(ws, mounts::read_mount_table)
}

/// [`reset_workspace`] with the mount table supplied by `read_table`.
pub fn reset_workspace_with<F>(ws: &Workspace, read_table: F) -> BuildResult<()>
where
    F: Fn() -> anyhow::Result<String>,
{
    match mounts::mounted_under_with(&ws.rootfs_dir, &read_table) {
        Ok(leftover) => {
            for point in ws.bind_points() {
                mounts::lazy_unmount_quiet(&point);
            }
            // Anything else mounted below the root (e.g. dev/pts from a manual chroot)
            for point in &leftover {
                mounts::lazy_unmount_quiet(point);
            }
        }
        Err(e) => {
            tracing::warn!("could not read mount table, forcing unmounts: {e:#}");
            for point in ws.bind_points() {
                if mounts::force_lazy_unmount(&point) {
                    tracing::debug!(target = %point.display(), "detached");
                }
            }
        }
    }

    ensure_unmounted_with(&ws.rootfs_dir, &read_table)?;

    remove_path(&ws.extract_dir)?;
    remove_path(&ws.rootfs_dir)?;
    remove_path(&ws.boot_template)?;
    remove_path(&ws.partial_output())?;
    remove_path(&ws.output)?;
    remove_path(&ws.checksum_file())?;

    Ok(())
}

/// Fail if anything is still mounted at or below `root`, or if the mount
/// table can't be read to tell.
pub fn ensure_unmounted(root: &Path) -> BuildResult<()> {
    ensure_unmounted_with(root, mounts::read_mount_table)
}

fn ensure_unmounted_with<F>(root: &Path, read_table: F) -> BuildResult<()>
where
    F: Fn() -> anyhow::Result<String>,
{
    let still = mounts::mounted_under_with(root, read_table).map_err(|cause| BuildError::Reset {
        path: root.to_path_buf(),
        cause: cause.context("cannot confirm nothing is mounted; refusing to delete"),
    })?;
    if still.is_empty() {
        Ok(())
    } else {
        Err(BuildError::StaleMounts {
            root: root.to_path_buf(),
            mounts: still,
        })
    }
}

/// Remove a file or directory tree; absent is fine.
fn remove_path(path: &Path) -> BuildResult<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(BuildError::Reset {
                path: path.to_path_buf(),
                cause: e.into(),
            })
        }
    };

    let result = if meta.is_dir() {
        println!("Removing {}...", path.display());
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BuildError::Reset {
            path: path.to_path_buf(),
            cause: anyhow::Error::new(e).context("recursive delete failed"),
        }),
    }
}

/// Reset the workspace, keeping the cached reference image.
pub fn clean_outputs(ws: &Workspace) -> anyhow::Result<()> {
    reset_workspace(ws)?;
    println!("Clean complete (reference image preserved).");
    Ok(())
}

/// Remove the cached reference image.
pub fn clean_downloads(ws: &Workspace) -> anyhow::Result<()> {
    if ws.reference.exists() {
        println!("Removing {}...", ws.reference.display());
        fs::remove_file(&ws.reference)
            .with_context(|| format!("Failed to remove {}", ws.reference.display()))?;
        println!("Downloads cleaned.");
    } else {
        println!("No downloads to clean.");
    }
    Ok(())
}

/// Clean everything (outputs + reference image).
pub fn clean_all(ws: &Workspace) -> anyhow::Result<()> {
    clean_outputs(ws)?;
    clean_downloads(ws)?;
    println!("\nFull clean complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn workspace(dir: &Path) -> Workspace {
        Workspace::new(&Config::from_vars(dir, &HashMap::new()))
    }

    #[test]
    fn test_reset_on_empty_workspace() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(temp.path());
        reset_workspace(&ws).unwrap();
        reset_workspace(&ws).unwrap();
    }

    #[test]
    fn test_reset_removes_scratch_and_keeps_reference() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(temp.path());

        fs::create_dir_all(ws.extract_dir.join("live")).unwrap();
        fs::write(ws.extract_dir.join("live/filesystem.squashfs"), b"x").unwrap();
        fs::create_dir_all(ws.rootfs_dir.join("etc")).unwrap();
        fs::write(&ws.boot_template, [0u8; 432]).unwrap();
        fs::write(ws.partial_output(), b"half").unwrap();
        fs::write(&ws.output, b"old").unwrap();
        fs::write(&ws.reference, b"iso").unwrap();

        reset_workspace(&ws).unwrap();

        assert!(!ws.extract_dir.exists());
        assert!(!ws.rootfs_dir.exists());
        assert!(!ws.boot_template.exists());
        assert!(!ws.partial_output().exists());
        assert!(!ws.output.exists());
        assert!(ws.reference.exists());
    }

    #[test]
    fn test_reset_keeps_tree_when_mount_table_unreadable() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(temp.path());
        fs::create_dir_all(ws.rootfs_dir.join("dev")).unwrap();
        fs::write(ws.rootfs_dir.join("dev/null"), b"").unwrap();
        fs::create_dir_all(&ws.extract_dir).unwrap();

        let err = reset_workspace_with(&ws, || anyhow::bail!("mount table unavailable"))
            .unwrap_err();

        assert!(matches!(err, BuildError::Reset { .. }));
        assert!(err.to_string().contains("refusing to delete"));
        assert!(ws.rootfs_dir.join("dev/null").exists());
        assert!(ws.extract_dir.exists());
    }

    #[test]
    fn test_reset_refuses_while_table_lists_a_bind() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(temp.path());
        fs::create_dir_all(ws.rootfs_dir.join("dev")).unwrap();
        fs::write(ws.rootfs_dir.join("dev/zero"), b"").unwrap();
        let root = fs::canonicalize(&ws.rootfs_dir).unwrap();
        let table = format!("udev {}/dev devtmpfs rw 0 0\n", root.display());

        let err = reset_workspace_with(&ws, || Ok(table.clone())).unwrap_err();

        assert!(matches!(err, BuildError::StaleMounts { .. }));
        assert!(ws.rootfs_dir.join("dev/zero").exists());
    }

    #[test]
    fn test_reset_does_not_follow_symlinked_dev() {
        let temp = TempDir::new().unwrap();
        let ws = workspace(temp.path());
        let outside = temp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("keep"), b"1").unwrap();
        fs::create_dir_all(&ws.rootfs_dir).unwrap();
        std::os::unix::fs::symlink(&outside, ws.rootfs_dir.join("dev")).unwrap();

        reset_workspace(&ws).unwrap();

        assert!(!ws.rootfs_dir.exists());
        assert!(outside.join("keep").exists());
    }
}
