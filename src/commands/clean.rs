//! Clean command - removes workspace artifacts.

use anyhow::Result;

use crate::clean;
use crate::config::Config;
use crate::workspace::Workspace;

/// Clean target for the clean command.
pub enum CleanTarget {
    /// Scratch trees and the final image (default)
    Outputs,
    /// Cached reference image
    Downloads,
    /// Everything
    All,
}

pub fn cmd_clean(config: &Config, target: CleanTarget) -> Result<()> {
    let ws = Workspace::new(config);
    match target {
        CleanTarget::Outputs => clean::clean_outputs(&ws),
        CleanTarget::Downloads => clean::clean_downloads(&ws),
        CleanTarget::All => clean::clean_all(&ws),
    }
}
