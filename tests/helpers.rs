//! Shared test utilities for respin tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use respin::config::Config;
use respin::workspace::Workspace;

pub const KERNEL: &str = "/live/vmlinuz-6.1.0-25-amd64";
pub const INITRD: &str = "/live/initrd.img-6.1.0-25-amd64";

/// Test environment rooted in a temporary working directory.
pub struct TestEnv {
    /// Kept alive for the lifetime of the TestEnv
    pub _temp_dir: TempDir,
    pub base_dir: PathBuf,
    pub config: Config,
    pub ws: Workspace,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_vars(&[])
    }

    pub fn with_vars(pairs: &[(&str, &str)]) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let config = Config::from_vars(&base_dir, &vars);
        let ws = Workspace::new(&config);
        Self {
            _temp_dir: temp_dir,
            base_dir,
            config,
            ws,
        }
    }

    /// Write the default payload files into `payload/`.
    pub fn write_payload(&self) {
        for file in &self.config.payload {
            write_file(
                &self.base_dir.join(&file.source),
                &format!("# {}\n", file.dest.display()),
            );
        }
    }
}

pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
}

pub const GRUB_CFG: &str = "\
source /boot/grub/config.cfg

set timeout=5
set default=\"2\"

# Live boot
menuentry \"Live system (amd64)\" --hotkey=l {
\tlinux\t/live/vmlinuz-6.1.0-25-amd64 boot=live components quiet splash findiso=${iso_path}
\tinitrd\t/live/initrd.img-6.1.0-25-amd64
}
menuentry \"Live system (amd64 fail-safe mode)\" {
\tlinux\t/live/vmlinuz-6.1.0-25-amd64 boot=live components memtest noapic noapm nodma nomce nosmp nosplash vga=788
\tinitrd\t/live/initrd.img-6.1.0-25-amd64
}
";

pub const LOOPBACK_CFG: &str = "\
menuentry \"Live system (amd64)\" {
  linux /live/vmlinuz-6.1.0-25-amd64 boot=live components findiso=${iso_path} quiet splash
  initrd /live/initrd.img-6.1.0-25-amd64
}
";

pub const ISOLINUX_CFG: &str = "\
include menu.cfg
default vesamenu.c32
prompt 0
timeout 0
";

pub const LIVE_CFG: &str = "\
label live-amd64
\tmenu label ^Live system (amd64)
\tmenu default
\tlinux /live/vmlinuz-6.1.0-25-amd64
\tinitrd /live/initrd.img-6.1.0-25-amd64
\tappend boot=live components quiet splash

label live-amd64-failsafe
\tmenu label Live system (amd64 fail-safe mode)
\tlinux /live/vmlinuz-6.1.0-25-amd64
\tinitrd /live/initrd.img-6.1.0-25-amd64
\tappend boot=live components memtest noapic noapm nodma nomce nosmp nosplash vga=788

label live-amd64-toram
\tmenu label Live system (amd64, load to RAM)
\tlinux /live/vmlinuz-6.1.0-25-amd64
\tinitrd /live/initrd.img-6.1.0-25-amd64
\tappend boot=live components toram quiet splash
";

/// Lay out the parts of a Debian live image tree the pipeline looks at.
pub fn create_mock_live_tree(root: &Path) {
    write_file(&root.join("boot/grub/grub.cfg"), GRUB_CFG);
    write_file(&root.join("boot/grub/loopback.cfg"), LOOPBACK_CFG);
    write_file(&root.join("isolinux/isolinux.cfg"), ISOLINUX_CFG);
    write_file(&root.join("isolinux/live.cfg"), LIVE_CFG);
    write_file(&root.join("isolinux/isolinux.bin"), "bios");
    write_file(&root.join("boot/grub/efi.img"), "efi");
    write_file(&root.join("live/filesystem.squashfs"), "hsqs");
    write_file(&root.join("live/filesystem.size"), "1234\n");
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

pub fn assert_file_lacks(path: &Path, unexpected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", path.display(), e));
    assert!(
        !content.contains(unexpected),
        "File {} unexpectedly contains {:?}:\n{}",
        path.display(),
        unexpected,
        content
    );
}

/// Lines of `content` that start with `directive` (after indentation).
pub fn directive_lines<'a>(content: &'a str, directive: &str) -> Vec<&'a str> {
    content
        .lines()
        .filter(|l| l.split_whitespace().next() == Some(directive))
        .collect()
}

pub fn is_root() -> bool {
    respin::preflight::effective_uid() == 0
}

/// Mount points at or below `root`, straight from the kernel.
pub fn mounts_below(root: &Path) -> Vec<PathBuf> {
    respin::mounts::mounted_under(root).expect("Failed to read mount table")
}
