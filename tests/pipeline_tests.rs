//! Pipeline tests that need root (mounts, chroot) or the network.
//!
//! Run with:
//!   sudo -E cargo test --test pipeline_tests -- --ignored --test-threads=1

mod helpers;

use helpers::{is_root, mounts_below, TestEnv};
use respin::chroot::{self, CustomizationPlan};
use respin::iso::BOOT_SECTOR_LEN;
use respin::mounts::BindMounts;
use respin::workspace::{LocatedTree, MutableRoot, BIND_POINTS};
use respin::{clean, pipeline, squashfs, BuildError, Stage};
use std::fs;
use std::io::Read;
use std::path::Path;

fn require_root() {
    if !is_root() {
        panic!("This test mounts filesystems; run it as root.");
    }
}

fn empty_root(env: &TestEnv) -> MutableRoot {
    let root = MutableRoot {
        path: env.ws.rootfs_dir.clone(),
    };
    fs::create_dir_all(root.join("etc")).unwrap();
    root
}

#[test]
#[ignore]
fn test_failed_customization_releases_mounts() {
    require_root();
    let env = TestEnv::new();
    // No /bin/bash inside, so the chroot command fails after the binds.
    let root = empty_root(&env);

    let err = chroot::customize(&root, &env.config, &CustomizationPlan::from_config(&env.config))
        .unwrap_err();

    assert!(matches!(err, BuildError::IsolatedExecution { .. }));
    assert_eq!(err.stage(), Stage::Customize);
    assert!(mounts_below(&root.path).is_empty(), "bind mounts leaked");
    assert!(!root.join("etc/resolv.conf").exists());
    for point in BIND_POINTS {
        assert!(root.join(point).is_dir());
    }
}

#[test]
#[ignore]
fn test_reset_detaches_binds_left_by_a_crash() {
    require_root();
    let env = TestEnv::new();
    let root = empty_root(&env);

    // Simulate a run killed between bind and release.
    std::mem::forget(BindMounts::bind_all(&root.path, &BIND_POINTS).unwrap());
    assert_eq!(mounts_below(&root.path).len(), BIND_POINTS.len());

    clean::reset_workspace(&env.ws).unwrap();

    assert!(mounts_below(&env.ws.rootfs_dir).is_empty());
    assert!(!env.ws.rootfs_dir.exists());
    assert!(Path::new("/dev/null").exists(), "host /dev was damaged");
}

#[test]
#[ignore]
fn test_repackage_refuses_live_binds() {
    require_root();
    let env = TestEnv::new();
    let root = empty_root(&env);
    let archive = env.ws.extract_dir.join("live/filesystem.squashfs");
    helpers::write_file(&archive, "hsqs");
    let tree = LocatedTree {
        root: env.ws.extract_dir.clone(),
        archive: archive.clone(),
    };

    let mut binds = BindMounts::bind_all(&root.path, &["proc"]).unwrap();
    let err = squashfs::repackage(&root, &tree).unwrap_err();
    binds.release();

    assert_eq!(err.stage(), Stage::Repackage);
    // The original archive is only deleted once the root is known clean.
    assert!(archive.exists());
}

fn read_prefix(path: &Path) -> Vec<u8> {
    let mut buf = vec![0u8; BOOT_SECTOR_LEN];
    fs::File::open(path)
        .unwrap()
        .read_exact(&mut buf)
        .unwrap();
    buf
}

#[test]
#[ignore]
fn test_build_twice_is_idempotent() {
    require_root();
    let env = TestEnv::new();
    env.write_payload();
    // Share the reference image cache with the repository checkout if present.
    let cached = Path::new(env!("CARGO_MANIFEST_DIR")).join(env.config.image_file_name());
    if cached.exists() {
        fs::copy(&cached, &env.ws.reference).unwrap();
    }

    for run in 0..2 {
        let output = pipeline::run(&env.config)
            .unwrap_or_else(|e| panic!("run {} failed: {}", run + 1, e));
        assert_eq!(output, env.ws.output);
        assert!(mounts_below(&env.ws.rootfs_dir).is_empty());
        assert!(!env.ws.partial_output().exists());
        assert!(!env.ws.boot_template.exists());
    }

    assert_eq!(read_prefix(&env.ws.output), read_prefix(&env.ws.reference));
    let sum = fs::read_to_string(env.ws.checksum_file()).unwrap();
    assert!(sum.ends_with("  respin.iso\n"));
}
