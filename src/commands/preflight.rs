//! Preflight command - runs preflight checks.

use anyhow::Result;

use crate::config::Config;
use crate::preflight;

/// Execute the preflight command.
pub fn cmd_preflight(config: &Config, strict: bool) -> Result<()> {
    let report = preflight::run_preflight(config);
    report.print();

    if strict {
        preflight::run_preflight_or_fail(config)?;
        println!("All preflight checks passed!");
    } else if !report.all_passed() {
        println!("Some checks failed. Use --strict to exit non-zero.");
    }
    Ok(())
}
