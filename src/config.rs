//! Configuration management for respin.
//!
//! Reads configuration from a `.env` file in the working directory and from
//! environment variables. Environment variables take precedence over `.env`.

use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default reference image: Debian 12 live "standard" hybrid ISO.
pub const DEFAULT_IMAGE_URL: &str = "https://cdimage.debian.org/cdimage/archive/12.7.0-live/amd64/iso-hybrid/debian-live-12.7.0-amd64-standard.iso";

pub const DEFAULT_OUTPUT: &str = "respin.iso";
pub const DEFAULT_OVERLAY_SIZE: &str = "80%";
pub const DEFAULT_EXTRA_KERNEL_PARAMS: &str = "console=tty0 console=ttyS0,115200n8";
pub const DEFAULT_VOLUME_ID: &str = "RESPIN_LIVE";
pub const DEFAULT_NAMESERVERS: &[&str] = &["1.1.1.1", "8.8.8.8"];

/// Packages installed into the live root before the container runtime.
pub const BASE_PACKAGES: &[&str] = &[
    "ca-certificates",
    "curl",
    "gnupg",
    "iproute2",
    "jq",
    "htop",
    "vim-tiny",
];

pub const DOCKER_REPO_URL: &str = "https://download.docker.com/linux/debian";
pub const DOCKER_PACKAGES: &[&str] = &[
    "docker-ce",
    "docker-ce-cli",
    "containerd.io",
    "docker-buildx-plugin",
    "docker-compose-plugin",
];

/// A file copied from the working directory into the live root.
#[derive(Debug, Clone, Serialize)]
pub struct PayloadFile {
    /// Relative to the working directory.
    pub source: PathBuf,
    /// Relative to the root of the live filesystem.
    pub dest: PathBuf,
    pub executable: bool,
}

/// Respin configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Invocation working directory; every workspace path hangs off it.
    pub base_dir: PathBuf,
    pub image_url: String,
    /// Final image path.
    pub output: PathBuf,
    /// Value of the `overlay-size=` kernel parameter.
    pub overlay_size: String,
    /// Extra kernel parameters appended alongside the overlay size.
    pub extra_kernel_params: Vec<String>,
    pub packages: Vec<String>,
    pub nameservers: Vec<String>,
    pub volume_id: String,
    pub payload: Vec<PayloadFile>,
    /// Units enabled inside the live root.
    pub enable_units: Vec<String>,
    /// Units disabled inside the live root.
    pub disable_units: Vec<String>,
}

impl Config {
    /// Load configuration from `.env` in `base_dir` and the environment.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if let Ok(iter) = dotenvy::from_path_iter(&env_path) {
            for (key, value) in iter.flatten() {
                env_vars.insert(key, value);
            }
        }

        // Environment variables override .env file
        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        Self::from_vars(base_dir, &env_vars)
    }

    /// Build a configuration from an explicit variable map.
    pub fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let image_url = get("RESPIN_IMAGE_URL")
            .unwrap_or(DEFAULT_IMAGE_URL)
            .to_string();

        let output = resolve(base_dir, get("RESPIN_OUTPUT").unwrap_or(DEFAULT_OUTPUT));

        let overlay_size = get("RESPIN_OVERLAY_SIZE")
            .unwrap_or(DEFAULT_OVERLAY_SIZE)
            .to_string();

        let extra_kernel_params = match vars.get("RESPIN_EXTRA_KERNEL_PARAMS") {
            // Explicitly empty disables the defaults.
            Some(v) => v.split_whitespace().map(str::to_string).collect(),
            None => DEFAULT_EXTRA_KERNEL_PARAMS
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        };

        let mut packages: Vec<String> = BASE_PACKAGES.iter().map(|s| s.to_string()).collect();
        if let Some(extra) = get("RESPIN_EXTRA_PACKAGES") {
            for pkg in split_list(extra) {
                if !packages.contains(&pkg) {
                    packages.push(pkg);
                }
            }
        }

        let nameservers = get("RESPIN_NAMESERVERS")
            .map(split_list)
            .unwrap_or_else(|| DEFAULT_NAMESERVERS.iter().map(|s| s.to_string()).collect());

        let volume_id = get("RESPIN_VOLUME_ID")
            .unwrap_or(DEFAULT_VOLUME_ID)
            .to_string();

        Self {
            base_dir: base_dir.to_path_buf(),
            image_url,
            output,
            overlay_size,
            extra_kernel_params,
            packages,
            nameservers,
            volume_id,
            payload: default_payload(),
            enable_units: vec![
                "dashboard.service".to_string(),
                "respin-firstboot.service".to_string(),
            ],
            disable_units: vec!["getty@tty1.service".to_string()],
        }
    }

    /// File name of the cached reference image (last URL segment).
    pub fn image_file_name(&self) -> &str {
        self.image_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("reference.iso")
    }

    /// Kernel parameters appended to every kernel line.
    pub fn kernel_params(&self) -> Vec<String> {
        let mut params = vec![format!("overlay-size={}", self.overlay_size)];
        params.extend(self.extra_kernel_params.iter().cloned());
        params
    }

    /// Print configuration for `respin show config`.
    pub fn print(&self) {
        println!("Configuration:");
        println!("  Working directory:   {}", self.base_dir.display());
        println!("  RESPIN_IMAGE_URL:    {}", self.image_url);
        println!("  RESPIN_OUTPUT:       {}", self.output.display());
        println!("  RESPIN_OVERLAY_SIZE: {}", self.overlay_size);
        println!(
            "  RESPIN_EXTRA_KERNEL_PARAMS: {}",
            self.extra_kernel_params.join(" ")
        );
        println!("  RESPIN_NAMESERVERS:  {}", self.nameservers.join(", "));
        println!("  RESPIN_VOLUME_ID:    {}", self.volume_id);
        println!("  Packages:            {}", self.packages.join(" "));
        println!("  Payload:");
        for file in &self.payload {
            let mode = if file.executable { " (0755)" } else { "" };
            println!(
                "    {} -> /{}{}",
                file.source.display(),
                file.dest.display(),
                mode
            );
        }
        println!("  Enable:  {}", self.enable_units.join(" "));
        println!("  Disable: {}", self.disable_units.join(" "));
    }
}

fn default_payload() -> Vec<PayloadFile> {
    vec![
        PayloadFile {
            source: PathBuf::from("payload/dashboard.sh"),
            dest: PathBuf::from("usr/local/bin/dashboard"),
            executable: true,
        },
        PayloadFile {
            source: PathBuf::from("payload/dashboard.service"),
            dest: PathBuf::from("etc/systemd/system/dashboard.service"),
            executable: false,
        },
        PayloadFile {
            source: PathBuf::from("payload/respin-firstboot.service"),
            dest: PathBuf::from("etc/systemd/system/respin-firstboot.service"),
            executable: false,
        },
    ]
}

fn resolve(base_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(Path::new("/work"), &HashMap::new());
        assert_eq!(config.image_url, DEFAULT_IMAGE_URL);
        assert_eq!(config.output, PathBuf::from("/work/respin.iso"));
        assert_eq!(
            config.image_file_name(),
            "debian-live-12.7.0-amd64-standard.iso"
        );
        assert_eq!(config.kernel_params()[0], "overlay-size=80%");
        assert!(config.kernel_params().contains(&"console=ttyS0,115200n8".to_string()));
    }

    #[test]
    fn test_extra_packages_are_appended_once() {
        let config = Config::from_vars(
            Path::new("/work"),
            &vars(&[("RESPIN_EXTRA_PACKAGES", "tmux, curl,,git")]),
        );
        assert_eq!(config.packages.iter().filter(|p| *p == "curl").count(), 1);
        assert!(config.packages.ends_with(&["tmux".to_string(), "git".to_string()]));
    }

    #[test]
    fn test_empty_extra_kernel_params_disables_defaults() {
        let config = Config::from_vars(
            Path::new("/work"),
            &vars(&[("RESPIN_EXTRA_KERNEL_PARAMS", "")]),
        );
        assert_eq!(config.kernel_params(), vec!["overlay-size=80%".to_string()]);
    }

    #[test]
    fn test_absolute_output_is_kept() {
        let config = Config::from_vars(
            Path::new("/work"),
            &vars(&[("RESPIN_OUTPUT", "/srv/images/custom.iso")]),
        );
        assert_eq!(config.output, PathBuf::from("/srv/images/custom.iso"));
    }

    #[test]
    fn test_url_without_file_name_falls_back() {
        let config = Config::from_vars(
            Path::new("/work"),
            &vars(&[("RESPIN_IMAGE_URL", "https://example.com/images/")]),
        );
        assert_eq!(config.image_file_name(), "reference.iso");
    }
}
