//! The full customization pipeline.
//!
//! Stages run strictly in order and each one hands a typed artifact to the
//! next, so a stage cannot be called before the one that produces its input.
//! A run owns the workspace exclusively; nothing enforces that.

use std::path::PathBuf;
use std::time::Instant;

use crate::bootcfg::{self, PatchSettings};
use crate::chroot::{self, CustomizationPlan};
use crate::clean;
use crate::config::Config;
use crate::download;
use crate::error::{BuildResult, Stage};
use crate::extract;
use crate::iso;
use crate::payload;
use crate::preflight;
use crate::squashfs;
use crate::timing::{self, Timer};
use crate::workspace::Workspace;

/// Run one stage with a banner and its duration.
fn stage<T>(stage: Stage, f: impl FnOnce() -> BuildResult<T>) -> BuildResult<T> {
    let index = Stage::ALL.iter().position(|s| *s == stage).unwrap_or(0) + 1;
    println!("\n[{}/{}] {}", index, Stage::ALL.len(), stage);
    let timer = Timer::start(stage.name());
    let result = f();
    match &result {
        Ok(_) => {
            timer.finish();
        }
        Err(e) => tracing::debug!(stage = %e.stage(), "stage failed"),
    }
    result
}

/// Build the final image from scratch. Returns its path.
pub fn run(config: &Config) -> BuildResult<PathBuf> {
    println!("=== respin: customizing {} ===", config.image_file_name());
    let start = Instant::now();
    let ws = Workspace::new(config);

    stage(Stage::Preflight, || preflight::run_preflight_or_fail(config))?;
    stage(Stage::Reset, || clean::reset_workspace(&ws))?;

    let reference = stage(Stage::Acquire, || {
        download::acquire_reference(&ws, &config.image_url)
    })?;

    let tree = stage(Stage::ExtractImage, || extract::extract_image(&ws, &reference))?;

    let (tree, root) = stage(Stage::ExtractRootfs, || {
        let tree = extract::locate_archive(tree)?;
        let root = extract::extract_rootfs(&ws, &tree)?;
        Ok((tree, root))
    })?;

    stage(Stage::PatchBoot, || {
        let report = bootcfg::patch_tree(&tree.root, &PatchSettings::from_config(config))?;
        report.print();
        Ok(())
    })?;

    stage(Stage::InjectPayload, || {
        payload::inject_payload(&config.base_dir, &root, &config.payload).map(|_| ())
    })?;

    stage(Stage::Customize, || {
        chroot::customize(&root, config, &CustomizationPlan::from_config(config))
    })?;

    stage(Stage::Repackage, || squashfs::repackage(&root, &tree))?;

    let output = stage(Stage::Assemble, || {
        iso::assemble(&ws, &reference, &tree, &config.volume_id)
    })?;

    println!(
        "\n=== Build complete in {} ===",
        timing::format_duration(start.elapsed())
    );
    println!("  Image:    {}", output.display());
    println!("  Checksum: {}", ws.checksum_file().display());
    Ok(output)
}
