//! Patch command - applies the boot config rewrites to an existing tree.

use anyhow::{bail, Result};
use std::path::Path;

use crate::bootcfg::{self, PatchSettings};
use crate::config::Config;

pub fn cmd_patch(config: &Config, dir: &Path) -> Result<()> {
    let dir = config.base_dir.join(dir);
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }

    let report = bootcfg::patch_tree(&dir, &PatchSettings::from_config(config))?;
    if report.files.is_empty() {
        println!("No boot configuration files under {}", dir.display());
    } else {
        report.print();
    }
    Ok(())
}
