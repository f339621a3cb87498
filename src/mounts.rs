//! Bind mounts into the mutable root, and the host mount table.
//!
//! A [`BindMounts`] set owns every pseudo-filesystem bound into the live root
//! while the isolated customization runs. Dropping it lazily unmounts them in
//! reverse order, on success, error and panic paths alike.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::process::Cmd;

const MOUNT_TABLE: &str = "/proc/self/mounts";
const MAX_STACKED_MOUNTS: usize = 8;

/// Parse mount points out of `/proc/self/mounts` content.
///
/// Spaces, tabs, newlines and backslashes in mount points are octal-escaped
/// by the kernel (`\040`, `\011`, `\012`, `\134`).
pub fn parse_mount_points(table: &str) -> Vec<PathBuf> {
    table
        .lines()
        .filter_map(|line| line.split(' ').nth(1))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_triplet(&bytes[i + 1..i + 4]) {
            let value = (bytes[i + 1] - b'0') * 64 + (bytes[i + 2] - b'0') * 8 + (bytes[i + 3] - b'0');
            out.push(value);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn is_octal_triplet(digits: &[u8]) -> bool {
    digits.len() == 3 && digits[0] <= b'3' && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

/// Mount points at or below `root`, deepest first.
pub fn mounts_under(table: &str, root: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = parse_mount_points(table)
        .into_iter()
        .filter(|mp| mp.starts_with(root))
        .collect();
    found.sort_by(|a, b| b.components().count().cmp(&a.components().count()).then(a.cmp(b)));
    found.dedup();
    found
}

/// Contents of the host mount table.
pub fn read_mount_table() -> Result<String> {
    fs::read_to_string(MOUNT_TABLE).with_context(|| format!("Failed to read {}", MOUNT_TABLE))
}

/// Read the live host mount table and list mounts at or below `root`.
pub fn mounted_under(root: &Path) -> Result<Vec<PathBuf>> {
    mounted_under_with(root, read_mount_table)
}

/// [`mounted_under`] with the table supplied by `read_table`.
pub fn mounted_under_with<F>(root: &Path, read_table: F) -> Result<Vec<PathBuf>>
where
    F: Fn() -> Result<String>,
{
    let table = read_table()?;
    // The kernel reports resolved paths.
    let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    Ok(mounts_under(&table, &root))
}

/// True if `target` is itself a mount point.
///
/// A symlinked `target` is never reported as mounted, so a link inside the
/// root pointing at a host path can't make us detach the host's mount.
pub fn is_mounted(target: &Path) -> Result<bool> {
    if fs::symlink_metadata(target).is_ok_and(|m| m.file_type().is_symlink()) {
        return Ok(false);
    }
    let target = fs::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
    let table = read_mount_table()?;
    Ok(parse_mount_points(&table).iter().any(|mp| *mp == target))
}

/// `umount -l` on `target` without consulting the mount table.
///
/// Used when the table can't be read. Failures (usually "not mounted") are
/// ignored; a symlinked or missing `target` is skipped. Returns true if
/// something was detached.
pub fn force_lazy_unmount(target: &Path) -> bool {
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => {}
        _ => return false,
    }
    match Cmd::new("umount").arg("-l").arg_path(target).allow_fail().run() {
        Ok(result) => result.success(),
        Err(e) => {
            tracing::debug!(target = %target.display(), "forced unmount failed: {e:#}");
            false
        }
    }
}

/// Lazily detach `target` if it is mounted.
///
/// Returns `Ok(false)` when nothing was mounted there. `umount -l` detaches
/// immediately even if something still holds the mount busy.
pub fn lazy_unmount(target: &Path) -> Result<bool> {
    let mut detached = false;
    // Stacked mounts need one detach each.
    for _ in 0..MAX_STACKED_MOUNTS {
        if !is_mounted(target)? {
            return Ok(detached);
        }
        Cmd::new("umount")
            .arg("-l")
            .arg_path(target)
            .error_msg(format!("Lazy unmount of {} failed", target.display()))
            .run()?;
        detached = true;
    }
    bail!(
        "{} is still mounted after {} lazy unmounts",
        target.display(),
        MAX_STACKED_MOUNTS
    )
}

/// Lazily detach `target`, logging instead of failing.
pub fn lazy_unmount_quiet(target: &Path) {
    match lazy_unmount(target) {
        Ok(true) => tracing::debug!(target = %target.display(), "detached"),
        Ok(false) => {}
        Err(e) => tracing::warn!(target = %target.display(), "unmount failed: {e:#}"),
    }
}

/// One host path bound into the mutable root.
#[derive(Debug)]
pub struct BindMount {
    target: PathBuf,
    active: bool,
}

impl BindMount {
    /// Bind `source` onto `target`, creating `target` as a directory if needed.
    ///
    /// A symlinked target is refused: following it would bind over a host
    /// path instead of one inside the root.
    pub fn bind(source: &Path, target: &Path) -> Result<Self> {
        match fs::symlink_metadata(target) {
            Ok(meta) if meta.file_type().is_symlink() => {
                bail!(
                    "Bind target {} is a symlink; refusing to follow it out of the root",
                    target.display()
                );
            }
            Ok(meta) if !meta.is_dir() => {
                bail!("Bind target {} is not a directory", target.display());
            }
            Ok(_) => {}
            Err(_) => {
                fs::create_dir_all(target)
                    .with_context(|| format!("Failed to create {}", target.display()))?;
            }
        }

        Cmd::new("mount")
            .arg("--bind")
            .arg_path(source)
            .arg_path(target)
            .error_msg(format!(
                "Failed to bind {} onto {}",
                source.display(),
                target.display()
            ))
            .run()?;

        Ok(Self {
            target: target.to_path_buf(),
            active: true,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Lazily unmount now. Safe to call more than once.
    pub fn release(&mut self) {
        if self.active {
            lazy_unmount_quiet(&self.target);
            self.active = false;
        }
    }
}

impl Drop for BindMount {
    fn drop(&mut self) {
        self.release();
    }
}

/// Host pseudo-filesystems bound into a root, released in reverse order.
#[derive(Debug, Default)]
pub struct BindMounts {
    mounts: Vec<BindMount>,
}

impl BindMounts {
    /// Bind each host `/<name>` onto `<root>/<name>`.
    ///
    /// If any bind fails, the ones already made are released before the
    /// error is returned.
    pub fn bind_all(root: &Path, names: &[&str]) -> Result<Self> {
        let mut set = Self::default();
        for name in names {
            let source = Path::new("/").join(name);
            let mount = BindMount::bind(&source, &root.join(name))?;
            set.mounts.push(mount);
        }
        Ok(set)
    }

    pub fn targets(&self) -> Vec<&Path> {
        self.mounts.iter().map(BindMount::target).collect()
    }

    pub fn release(&mut self) {
        while let Some(mut mount) = self.mounts.pop() {
            mount.release();
        }
    }
}

impl Drop for BindMounts {
    fn drop(&mut self) {
        self.release();
    }
}
