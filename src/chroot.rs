//! Isolated customization of the mutable root.
//!
//! Protocol:
//! 1. Write a resolver config into the root (it has no network config).
//! 2. Bind host `/dev`, `/proc` and `/sys` into it.
//! 3. Run the package/service script under `chroot`.
//! 4. Unmount the binds and remove the resolver config.
//!
//! Steps 1 and 2 return guards, so step 4 runs on every exit path.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::{Config, DOCKER_PACKAGES, DOCKER_REPO_URL};
use crate::error::{BuildError, BuildResult};
use crate::mounts::BindMounts;
use crate::process::Cmd;
use crate::workspace::{MutableRoot, BIND_POINTS};

const RESOLV_CONF: &str = "etc/resolv.conf";
const DOCKER_KEY: &str = "/etc/apt/keyrings/docker.asc";
const DOCKER_LIST: &str = "/etc/apt/sources.list.d/docker.list";

/// What `etc/resolv.conf` was before we replaced it.
#[derive(Debug)]
enum Previous {
    Absent,
    File(Vec<u8>),
    Symlink(PathBuf),
}

/// Temporary resolver config inside the root.
///
/// A symlinked `resolv.conf` (e.g. to systemd-resolved's stub) is replaced
/// rather than written through, since the link target would resolve on the
/// host. The original is put back on release.
#[derive(Debug)]
pub struct ResolverConfig {
    path: PathBuf,
    previous: Option<Previous>,
}

impl ResolverConfig {
    pub fn install(root: &MutableRoot, nameservers: &[String]) -> Result<Self> {
        let path = root.join(RESOLV_CONF);
        let previous = match fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                let target = fs::read_link(&path)?;
                fs::remove_file(&path)?;
                Previous::Symlink(target)
            }
            Ok(meta) if meta.is_file() => Previous::File(fs::read(&path)?),
            Ok(_) => bail!("{} is not a regular file", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Previous::Absent,
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, render_resolv_conf(nameservers))
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(Self {
            path,
            previous: Some(previous),
        })
    }

    /// Remove the injected config and restore the original. Idempotent.
    pub fn release(&mut self) -> Result<()> {
        let Some(previous) = self.previous.take() else {
            return Ok(());
        };
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match previous {
            Previous::Absent => {}
            Previous::File(bytes) => fs::write(&self.path, bytes)?,
            Previous::Symlink(target) => std::os::unix::fs::symlink(target, &self.path)?,
        }
        Ok(())
    }
}

impl Drop for ResolverConfig {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(path = %self.path.display(), "could not restore resolver config: {e:#}");
        }
    }
}

pub fn render_resolv_conf(nameservers: &[String]) -> String {
    nameservers
        .iter()
        .map(|ns| format!("nameserver {}\n", ns))
        .collect()
}

/// Ordered shell commands run inside the root.
#[derive(Debug, Clone)]
pub struct CustomizationPlan {
    pub packages: Vec<String>,
    pub runtime_repo: String,
    pub runtime_packages: Vec<String>,
    pub enable_units: Vec<String>,
    pub disable_units: Vec<String>,
}

impl CustomizationPlan {
    pub fn from_config(config: &Config) -> Self {
        Self {
            packages: config.packages.clone(),
            runtime_repo: DOCKER_REPO_URL.to_string(),
            runtime_packages: DOCKER_PACKAGES.iter().map(|s| s.to_string()).collect(),
            enable_units: config.enable_units.clone(),
            disable_units: config.disable_units.clone(),
        }
    }

    pub fn commands(&self) -> Vec<String> {
        let mut cmds = vec![
            "apt-get update".to_string(),
            format!("apt-get install -y --no-install-recommends {}", self.packages.join(" ")),
            "install -m 0755 -d /etc/apt/keyrings".to_string(),
            format!("curl -fsSL {}/gpg -o {}", self.runtime_repo, DOCKER_KEY),
            format!("chmod a+r {}", DOCKER_KEY),
            format!(
                "echo \"deb [arch=$(dpkg --print-architecture) signed-by={}] {} $(. /etc/os-release && echo \"$VERSION_CODENAME\") stable\" > {}",
                DOCKER_KEY, self.runtime_repo, DOCKER_LIST
            ),
            "apt-get update".to_string(),
            format!("apt-get install -y {}", self.runtime_packages.join(" ")),
        ];
        if !self.enable_units.is_empty() {
            cmds.push(format!("systemctl enable {}", self.enable_units.join(" ")));
        }
        if !self.disable_units.is_empty() {
            cmds.push(format!("systemctl disable {}", self.disable_units.join(" ")));
        }
        cmds.push("apt-get clean".to_string());
        cmds
    }

    /// The full script passed to `bash -c`. Stops at the first failure.
    pub fn script(&self) -> String {
        let mut script = String::from("set -euo pipefail\n");
        for cmd in self.commands() {
            script.push_str(&cmd);
            script.push('\n');
        }
        script
    }
}

/// Run `script` with `root` as the filesystem root.
fn run_in_root(root: &Path, script: &str) -> Result<()> {
    Cmd::new("chroot")
        .arg_path(root)
        .args(["/bin/bash", "-c", script])
        .env("DEBIAN_FRONTEND", "noninteractive")
        .env("LC_ALL", "C")
        .env("PATH", "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin")
        .error_msg("Command inside the isolated root failed")
        .run_interactive()?;
    Ok(())
}

/// Run the customization plan inside the mutable root.
///
/// Bind mounts and the resolver config are released before this returns,
/// whether the script succeeded or not.
pub fn customize(root: &MutableRoot, config: &Config, plan: &CustomizationPlan) -> BuildResult<()> {
    let wrap = |cause| BuildError::IsolatedExecution { cause };

    let mut resolver = ResolverConfig::install(root, &config.nameservers)
        .context("Failed to inject resolver config")
        .map_err(wrap)?;

    let mut binds = BindMounts::bind_all(&root.path, &BIND_POINTS)
        .context("Failed to bind host pseudo-filesystems")
        .map_err(wrap)?;
    tracing::debug!(targets = ?binds.targets(), "bound");

    let result = run_in_root(&root.path, &plan.script());

    binds.release();
    let restored = resolver.release();

    result.map_err(wrap)?;
    restored
        .context("Failed to remove injected resolver config")
        .map_err(wrap)?;

    Ok(())
}
