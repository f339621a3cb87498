//! Host tool availability checks.

use std::path::PathBuf;

use crate::error::{BuildError, BuildResult};
use crate::process;

use super::types::CheckResult;

/// An external command the pipeline shells out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequiredTool {
    pub name: &'static str,
    /// Debian package that provides it.
    pub package: &'static str,
    pub purpose: &'static str,
}

const fn tool(name: &'static str, package: &'static str, purpose: &'static str) -> RequiredTool {
    RequiredTool {
        name,
        package,
        purpose,
    }
}

/// Everything `respin build` runs, in the order the stages first need it.
pub const REQUIRED_TOOLS: &[RequiredTool] = &[
    tool("curl", "curl", "Required to fetch the reference image"),
    tool("xorriso", "xorriso", "Required to extract and assemble ISO images"),
    tool("chmod", "coreutils", "Required to make the extracted tree writable"),
    tool("unsquashfs", "squashfs-tools", "Required to extract the live root"),
    tool("mount", "mount", "Required to bind host pseudo-filesystems"),
    tool("umount", "mount", "Required to release bind mounts"),
    tool("chroot", "coreutils", "Required to customize the live root"),
    tool("mksquashfs", "squashfs-tools", "Required to repack the live root"),
    tool("du", "coreutils", "Required to record the live root size"),
];

/// Only needed by `respin run` and `respin test`.
pub const OPTIONAL_TOOLS: &[RequiredTool] = &[tool(
    "qemu-system-x86_64",
    "qemu-system-x86",
    "Required for `respin run` and `respin test`",
)];

/// Fail on the first tool `lookup` cannot resolve.
pub fn require_tools_with<F>(tools: &[RequiredTool], lookup: F) -> BuildResult<()>
where
    F: Fn(&str) -> Option<PathBuf>,
{
    match tools.iter().find(|t| lookup(t.name).is_none()) {
        Some(missing) => Err(BuildError::MissingTool {
            tool: missing.name.to_string(),
            package: missing.package.to_string(),
        }),
        None => Ok(()),
    }
}

/// Check every tool and report each one.
pub fn check_host_tools() -> Vec<CheckResult> {
    let mut results = Vec::new();

    for t in REQUIRED_TOOLS {
        results.push(check_tool_exists(t, true));
    }
    for t in OPTIONAL_TOOLS {
        results.push(check_tool_exists(t, false));
    }

    if let Some(path) = crate::qemu::find_ovmf() {
        results.push(CheckResult::pass_with("OVMF firmware", &path.display().to_string()));
    } else {
        results.push(CheckResult::warn(
            "OVMF firmware",
            "Not found - `respin run` falls back to BIOS. Install the ovmf package.",
        ));
    }

    results
}

fn check_tool_exists(t: &RequiredTool, required: bool) -> CheckResult {
    match process::which(t.name) {
        Some(path) => CheckResult::pass_with(t.name, &path.display().to_string()),
        None => {
            let msg = format!("Not found. Install '{}' package. {}", t.package, t.purpose);
            if required {
                CheckResult::fail(t.name, &msg)
            } else {
                CheckResult::warn(t.name, &msg)
            }
        }
    }
}
