//! Workspace layout and the artifacts handed from stage to stage.
//!
//! ```text
//! <base_dir>/
//! ├── debian-live-*.iso     # Reference image (cached between runs)
//! ├── iso-contents/         # Extracted file tree (scratch)
//! ├── squashfs-root/        # Mutable root (scratch)
//! ├── isohdpfx.bin          # Boot sector template (transient)
//! ├── respin.iso.partial    # Final image while xorriso writes it
//! └── respin.iso            # Final image
//! ```

use std::path::{Path, PathBuf};

use crate::config::Config;

pub const EXTRACT_DIR: &str = "iso-contents";
pub const ROOTFS_DIR: &str = "squashfs-root";
pub const BOOT_TEMPLATE: &str = "isohdpfx.bin";

/// Mount points under the mutable root that receive host pseudo-filesystems.
pub const BIND_POINTS: [&str; 3] = ["dev", "proc", "sys"];

/// Fixed paths of one pipeline run.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub base_dir: PathBuf,
    pub reference: PathBuf,
    pub extract_dir: PathBuf,
    pub rootfs_dir: PathBuf,
    pub boot_template: PathBuf,
    pub output: PathBuf,
}

impl Workspace {
    pub fn new(config: &Config) -> Self {
        let base = &config.base_dir;
        Self {
            base_dir: base.clone(),
            reference: base.join(config.image_file_name()),
            extract_dir: base.join(EXTRACT_DIR),
            rootfs_dir: base.join(ROOTFS_DIR),
            boot_template: base.join(BOOT_TEMPLATE),
            output: config.output.clone(),
        }
    }

    /// Where the final image is written before it is renamed into place.
    pub fn partial_output(&self) -> PathBuf {
        let mut name = self
            .output
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".partial");
        self.output.with_file_name(name)
    }

    /// Checksum file written next to the final image.
    pub fn checksum_file(&self) -> PathBuf {
        let mut name = self
            .output
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".sha256");
        self.output.with_file_name(name)
    }

    /// Absolute bind points under the mutable root, in mount order.
    pub fn bind_points(&self) -> Vec<PathBuf> {
        BIND_POINTS.iter().map(|p| self.rootfs_dir.join(p)).collect()
    }
}

/// The cached, never-modified reference image.
#[derive(Debug, Clone)]
pub struct ReferenceImage {
    pub path: PathBuf,
}

/// Writable copy of the reference image's file tree.
#[derive(Debug)]
pub struct ExtractedTree {
    pub root: PathBuf,
}

/// The extracted tree once its compressed filesystem has been located.
#[derive(Debug)]
pub struct LocatedTree {
    pub root: PathBuf,
    /// The single `*.squashfs` inside `root`.
    pub archive: PathBuf,
}

/// Unpacked compressed filesystem; the object being customized.
#[derive(Debug)]
pub struct MutableRoot {
    pub path: PathBuf,
}

impl MutableRoot {
    /// Join a root-relative path (leading `/` ignored).
    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        let rel = rel.as_ref();
        let rel = rel.strip_prefix("/").unwrap_or(rel);
        self.path.join(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_layout_hangs_off_base_dir() {
        let config = Config::from_vars(Path::new("/w"), &HashMap::new());
        let ws = Workspace::new(&config);
        assert_eq!(ws.extract_dir, PathBuf::from("/w/iso-contents"));
        assert_eq!(ws.rootfs_dir, PathBuf::from("/w/squashfs-root"));
        assert_eq!(ws.boot_template, PathBuf::from("/w/isohdpfx.bin"));
        assert_eq!(ws.partial_output(), PathBuf::from("/w/respin.iso.partial"));
        assert_eq!(ws.checksum_file(), PathBuf::from("/w/respin.iso.sha256"));
        assert_eq!(
            ws.reference,
            PathBuf::from("/w/debian-live-12.7.0-amd64-standard.iso")
        );
    }

    #[test]
    fn test_bind_points() {
        let config = Config::from_vars(Path::new("/w"), &HashMap::new());
        let ws = Workspace::new(&config);
        assert_eq!(
            ws.bind_points(),
            vec![
                PathBuf::from("/w/squashfs-root/dev"),
                PathBuf::from("/w/squashfs-root/proc"),
                PathBuf::from("/w/squashfs-root/sys"),
            ]
        );
    }

    #[test]
    fn test_mutable_root_join_strips_leading_slash() {
        let root = MutableRoot {
            path: PathBuf::from("/w/squashfs-root"),
        };
        assert_eq!(
            root.join("/etc/resolv.conf"),
            PathBuf::from("/w/squashfs-root/etc/resolv.conf")
        );
    }
}
