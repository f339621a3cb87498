//! Run and test commands - boot the image in QEMU.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::process;
use crate::qemu;

fn ensure_qemu() -> Result<()> {
    if !process::exists("qemu-system-x86_64") {
        bail!("qemu-system-x86_64 not found. Install the 'qemu-system-x86' package.");
    }
    Ok(())
}

pub fn cmd_run(config: &Config, force_bios: bool) -> Result<()> {
    ensure_qemu()?;
    qemu::run_iso(&config.output, force_bios)
}

/// Headless boot verification.
pub fn cmd_test(config: &Config, timeout: u64) -> Result<()> {
    ensure_qemu()?;
    qemu::test_iso(&config.output, timeout)
}
