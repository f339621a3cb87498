//! Boot menu patching for the extracted image.
//!
//! Four file names are recognized:
//!
//! | File           | Loader   | Extra rewrite                                 |
//! |----------------|----------|-----------------------------------------------|
//! | `grub.cfg`     | GRUB     | `set timeout=10`, `set default="0"`           |
//! | `loopback.cfg` | GRUB     |                                               |
//! | `isolinux.cfg` | ISOLINUX | `timeout 100` (tenths of a second)            |
//! | `live.cfg`     | ISOLINUX | `menu default` after the first `label` line   |
//!
//! Every matched file loses its `quiet` and `splash` words and gets the
//! overlay size (plus any extra parameters) appended to each kernel line.
//! Patching is idempotent.

mod document;

pub use document::BootConfig;

use anyhow::{anyhow, Context};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{BuildError, BuildResult};

pub const GRUB_MAIN: &str = "grub.cfg";
pub const GRUB_LOOPBACK: &str = "loopback.cfg";
pub const ISOLINUX_MAIN: &str = "isolinux.cfg";
pub const LIVE_MENU: &str = "live.cfg";

/// Words removed from every matched file.
pub const STRIPPED_TOKENS: [&str; 2] = ["quiet", "splash"];

pub const GRUB_TIMEOUT_SECS: u32 = 10;
pub const GRUB_DEFAULT_ENTRY: &str = "\"0\"";
pub const ISOLINUX_TIMEOUT_TENTHS: u32 = 100;

const GRUB_KERNEL_DIRECTIVES: &[&str] = &["linux", "linuxefi"];
const ISOLINUX_KERNEL_DIRECTIVES: &[&str] = &["append"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Grub,
    Isolinux,
}

/// What a recognized boot config file is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    GrubMain,
    GrubLoopback,
    IsolinuxMain,
    LiveMenu,
}

impl Role {
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name {
            GRUB_MAIN => Some(Role::GrubMain),
            GRUB_LOOPBACK => Some(Role::GrubLoopback),
            ISOLINUX_MAIN => Some(Role::IsolinuxMain),
            LIVE_MENU => Some(Role::LiveMenu),
            _ => None,
        }
    }

    pub fn loader(self) -> Loader {
        match self {
            Role::GrubMain | Role::GrubLoopback => Loader::Grub,
            Role::IsolinuxMain | Role::LiveMenu => Loader::Isolinux,
        }
    }

    /// Words that start a kernel command line for this loader.
    ///
    /// ISOLINUX's `linux` line only names the image; parameters go on `append`.
    pub fn kernel_directives(self) -> &'static [&'static str] {
        match self.loader() {
            Loader::Grub => GRUB_KERNEL_DIRECTIVES,
            Loader::Isolinux => ISOLINUX_KERNEL_DIRECTIVES,
        }
    }
}

/// Values written into the boot menus.
#[derive(Debug, Clone)]
pub struct PatchSettings {
    pub kernel_params: Vec<String>,
    pub grub_timeout_secs: u32,
    pub isolinux_timeout_tenths: u32,
}

impl PatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            kernel_params: config.kernel_params(),
            grub_timeout_secs: GRUB_TIMEOUT_SECS,
            isolinux_timeout_tenths: ISOLINUX_TIMEOUT_TENTHS,
        }
    }
}

/// What patching did to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: PathBuf,
    pub role: Role,
    pub tokens_removed: usize,
    pub kernel_lines: usize,
    pub menu_default: bool,
}

#[derive(Debug, Default)]
pub struct PatchReport {
    pub files: Vec<FileReport>,
}

impl PatchReport {
    pub fn print(&self) {
        for file in &self.files {
            let mut notes = vec![format!("{} kernel line(s)", file.kernel_lines)];
            if file.tokens_removed > 0 {
                notes.push(format!("{} token(s) removed", file.tokens_removed));
            }
            if file.menu_default {
                notes.push("default entry set".to_string());
            }
            println!("  Patched {} ({})", file.path.display(), notes.join(", "));
        }
    }
}

/// Recognized boot configs under `tree`, sorted by path.
pub fn find_boot_configs(tree: &Path) -> Vec<(PathBuf, Role)> {
    WalkDir::new(tree)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let role = Role::from_file_name(&e.file_name().to_string_lossy())?;
            Some((e.into_path(), role))
        })
        .collect()
}

/// Apply every rewrite for `role` to one config.
///
/// `holds_default` marks the live menu whose first entry becomes the BIOS
/// default; other ISOLINUX files then lose any `menu default` of their own.
/// Returns `(tokens_removed, kernel_lines, menu_default_set)`.
pub fn patch_config(
    cfg: &mut BootConfig,
    role: Role,
    settings: &PatchSettings,
    holds_default: Option<bool>,
) -> anyhow::Result<(usize, usize, bool)> {
    let removed = cfg.strip_tokens(&STRIPPED_TOKENS);
    let kernel_lines = cfg.append_kernel_params(role.kernel_directives(), &settings.kernel_params);
    let mut menu_default = false;

    match role {
        Role::GrubMain => {
            cfg.set_grub_var("timeout", &settings.grub_timeout_secs.to_string());
            cfg.set_grub_var("default", GRUB_DEFAULT_ENTRY);
        }
        Role::GrubLoopback => {}
        Role::IsolinuxMain => {
            cfg.set_option("timeout", &settings.isolinux_timeout_tenths.to_string());
        }
        Role::LiveMenu => {}
    }

    if role.loader() == Loader::Isolinux {
        match (role, holds_default) {
            (Role::LiveMenu, Some(true)) => {
                cfg.mark_first_label_default()
                    .ok_or_else(|| anyhow!("live menu has no 'label' entry to make default"))?;
                menu_default = true;
            }
            // Some live menu holds the default; no competing markers.
            (_, Some(false)) => {
                cfg.clear_menu_defaults();
            }
            _ => {}
        }
    }

    Ok((removed, kernel_lines, menu_default))
}

/// Patch every recognized boot config under `tree` in place.
pub fn patch_tree(tree: &Path, settings: &PatchSettings) -> BuildResult<PatchReport> {
    let configs = find_boot_configs(tree);
    if configs.is_empty() {
        tracing::warn!(tree = %tree.display(), "no boot configuration files found");
    }

    // The first live menu in traversal order carries the BIOS default.
    let default_holder = configs
        .iter()
        .find(|(_, role)| *role == Role::LiveMenu)
        .map(|(path, _)| path.clone());

    let mut report = PatchReport::default();
    let mut defaults = 0;

    for (path, role) in configs {
        let wrap = |cause| BuildError::Patch {
            path: path.clone(),
            cause,
        };

        let text = fs::read_to_string(&path)
            .context("read failed (boot configs must be UTF-8 text)")
            .map_err(wrap)?;
        let mut cfg = BootConfig::parse(&text);

        let holds_default = default_holder.as_ref().map(|holder| *holder == path);
        let (tokens_removed, kernel_lines, menu_default) =
            patch_config(&mut cfg, role, settings, holds_default).map_err(wrap)?;

        if kernel_lines == 0 && role != Role::IsolinuxMain {
            tracing::warn!(path = %path.display(), "boot config has no kernel lines");
        }
        if role.loader() == Loader::Isolinux {
            defaults += cfg.menu_default_count();
        }

        fs::write(&path, cfg.render())
            .context("write failed")
            .map_err(wrap)?;

        report.files.push(FileReport {
            path,
            role,
            tokens_removed,
            kernel_lines,
            menu_default,
        });
    }

    if let Some(holder) = default_holder {
        if defaults != 1 {
            return Err(BuildError::Patch {
                path: holder,
                cause: anyhow!("expected exactly one BIOS 'menu default', found {}", defaults),
            });
        }
    }

    Ok(report)
}
