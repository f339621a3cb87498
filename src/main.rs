//! respin - live ISO remastering tool.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use respin::commands;
use respin::config::Config;

#[derive(Parser)]
#[command(name = "respin")]
#[command(about = "Customize a live ISO and repack it as a bootable hybrid image")]
#[command(
    after_help = "QUICK START:\n  respin preflight  Check tools and privileges\n  sudo respin build Build respin.iso\n  respin test       Boot it headless and check networking\n  sudo respin clean Remove scratch trees and the image"
)]
struct Cli {
    /// Working directory (default: current directory)
    #[arg(short = 'C', long = "dir", global = true)]
    dir: Option<PathBuf>,

    /// Debug logging (same as RUST_LOG=debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline (needs root)
    Build,

    /// Run preflight checks
    Preflight {
        /// Exit non-zero on the first failed check
        #[arg(long)]
        strict: bool,
    },

    /// Fetch the reference image (skipped if cached)
    Download,

    /// Unpack the reference image and its live root for inspection
    Extract,

    /// Apply the boot config rewrites to an extracted image tree
    Patch {
        /// Directory containing the image tree
        dir: PathBuf,
    },

    /// Remove workspace artifacts (default: keeps the reference image)
    Clean {
        #[command(subcommand)]
        what: Option<CleanTarget>,
    },

    /// Show information
    Show {
        #[command(subcommand)]
        what: ShowTarget,
    },

    /// Boot the final image in QEMU (UEFI when OVMF is installed)
    Run {
        /// Boot with legacy BIOS firmware
        #[arg(long)]
        bios: bool,
    },

    /// Boot the final image headless and verify it gets a network address
    Test {
        /// Timeout in seconds
        #[arg(short, long, default_value = "300")]
        timeout: u64,
    },
}

#[derive(Subcommand)]
enum CleanTarget {
    /// Remove the cached reference image
    Downloads,
    /// Remove everything, including the reference image
    All,
}

#[derive(Subcommand)]
enum ShowTarget {
    /// Show current configuration
    Config {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show workspace artifacts and leftover mounts
    Status,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cwd = std::env::current_dir()?;
    let base_dir = match cli.dir {
        Some(dir) => cwd.join(dir),
        None => cwd,
    };
    let config = Config::load(&base_dir);

    match cli.command {
        Commands::Build => commands::cmd_build(&config)?,
        Commands::Preflight { strict } => commands::cmd_preflight(&config, strict)?,
        Commands::Download => commands::cmd_download(&config)?,
        Commands::Extract => commands::cmd_extract(&config)?,
        Commands::Patch { dir } => commands::cmd_patch(&config, &dir)?,
        Commands::Clean { what } => {
            let target = match what {
                None => commands::clean::CleanTarget::Outputs,
                Some(CleanTarget::Downloads) => commands::clean::CleanTarget::Downloads,
                Some(CleanTarget::All) => commands::clean::CleanTarget::All,
            };
            commands::cmd_clean(&config, target)?;
        }
        Commands::Show { what } => {
            let target = match what {
                ShowTarget::Config { json } => commands::show::ShowTarget::Config { json },
                ShowTarget::Status => commands::show::ShowTarget::Status,
            };
            commands::cmd_show(&config, target)?;
        }
        Commands::Run { bios } => commands::cmd_run(&config, bios)?,
        Commands::Test { timeout } => commands::cmd_test(&config, timeout)?,
    }

    Ok(())
}
