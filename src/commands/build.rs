//! Build command - runs the full pipeline.

use anyhow::Result;

use crate::config::Config;
use crate::pipeline;

pub fn cmd_build(config: &Config) -> Result<()> {
    pipeline::run(config)?;
    Ok(())
}
