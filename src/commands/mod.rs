//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `build` - Run the full pipeline
//! - `preflight` - Run preflight checks
//! - `download` - Fetch the reference image
//! - `extract` - Unpack the reference image for inspection
//! - `patch` - Patch boot configs in an existing tree
//! - `clean` - Remove workspace artifacts
//! - `show` - Display information
//! - `run` - Boot the image in QEMU

pub mod build;
pub mod clean;
mod download;
mod extract;
mod patch;
mod preflight;
mod run;
pub mod show;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use download::cmd_download;
pub use extract::cmd_extract;
pub use patch::cmd_patch;
pub use preflight::cmd_preflight;
pub use run::{cmd_run, cmd_test};
pub use show::cmd_show;
