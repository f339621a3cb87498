//! Boot tests for the final image using QEMU.
//!
//! These tests verify that a built image boots to a shell and brings up
//! networking. They require:
//!   1. Running `sudo cargo run -- build` first
//!   2. QEMU installed on the system
//!
//! Run these tests with:
//!   cargo test --test boot_tests -- --ignored

use respin::process;
use respin::qemu;
use std::path::{Path, PathBuf};

/// Get path to the final image.
fn image_path() -> PathBuf {
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
    Path::new(&manifest_dir).join(respin::config::DEFAULT_OUTPUT)
}

fn require_boot_prerequisites() -> PathBuf {
    let image = image_path();
    if !image.exists() {
        panic!(
            "Image not built. Run 'sudo cargo run -- build' first.\nExpected at: {}",
            image.display()
        );
    }
    if !process::exists("qemu-system-x86_64") {
        panic!("QEMU not installed. Install qemu-system-x86_64 to run boot tests.");
    }
    image
}

#[test]
#[ignore]
fn test_boot_reaches_shell_with_network() {
    let image = require_boot_prerequisites();
    qemu::test_iso(&image, 600).expect("boot test failed");
}

#[test]
#[ignore]
fn test_boot_sector_matches_reference() {
    let image = require_boot_prerequisites();
    let config = respin::config::Config::from_vars(
        image.parent().unwrap(),
        &Default::default(),
    );
    let reference = image.with_file_name(config.image_file_name());
    if !reference.exists() {
        panic!("Reference image not cached at {}", reference.display());
    }

    let prefix = |p: &Path| std::fs::read(p).unwrap()[..respin::iso::BOOT_SECTOR_LEN].to_vec();
    assert_eq!(prefix(&image), prefix(&reference));
}
