//! Preflight checks for respin.
//!
//! `respin preflight` prints a table of every check. The build pipeline runs
//! the fail-fast variant: the first missing tool, missing privilege or
//! missing payload file aborts before anything on disk is touched.

mod environment;
mod host_tools;
mod types;

use crate::config::Config;
use crate::error::BuildResult;
use crate::process;

pub use environment::{effective_uid, require_root_uid};
pub use host_tools::{require_tools_with, RequiredTool, OPTIONAL_TOOLS, REQUIRED_TOOLS};
pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Run all checks and collect the results.
pub fn run_preflight(config: &Config) -> PreflightReport {
    let mut checks = Vec::new();

    println!("Running preflight checks...\n");

    println!("Checking host tools...");
    checks.extend(host_tools::check_host_tools());

    println!("Checking build environment...");
    checks.extend(environment::check_build_environment(config));

    println!();

    PreflightReport { checks }
}

/// Fail fast on the first problem. Has no side effects.
pub fn run_preflight_or_fail(config: &Config) -> BuildResult<()> {
    require_tools_with(REQUIRED_TOOLS, process::which)?;
    require_root_uid(effective_uid())?;
    environment::require_payload(config)?;
    Ok(())
}
