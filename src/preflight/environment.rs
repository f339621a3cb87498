//! Build environment checks (privileges, payload files, disk space).

use std::path::PathBuf;

use crate::config::Config;
use crate::error::{BuildError, BuildResult};
use crate::process::Cmd;

use super::types::CheckResult;

pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() }
}

/// Mounting and chroot need uid 0.
pub fn require_root_uid(uid: u32) -> BuildResult<()> {
    if uid == 0 {
        Ok(())
    } else {
        Err(BuildError::NotRoot { uid })
    }
}

/// Reference image, two unpacked copies of the live root and the new image.
const MIN_FREE_GB: u64 = 10;

/// Payload sources that do not exist, in declaration order.
pub fn missing_payload(config: &Config) -> Vec<PathBuf> {
    config
        .payload
        .iter()
        .map(|f| config.base_dir.join(&f.source))
        .filter(|p| !p.is_file())
        .collect()
}

pub fn require_payload(config: &Config) -> BuildResult<()> {
    match missing_payload(config).into_iter().next() {
        Some(path) => Err(BuildError::MissingPayload { path }),
        None => Ok(()),
    }
}

pub fn check_build_environment(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let uid = effective_uid();
    if uid == 0 {
        results.push(CheckResult::pass("root privileges"));
    } else {
        results.push(CheckResult::fail(
            "root privileges",
            &format!("effective uid is {} - run with sudo", uid),
        ));
    }

    let missing = missing_payload(config);
    for file in &config.payload {
        let name = file.source.display().to_string();
        let source = config.base_dir.join(&file.source);
        if missing.contains(&source) {
            results.push(CheckResult::fail(&name, "Not found"));
        } else {
            results.push(CheckResult::pass_with(&name, &format!("-> /{}", file.dest.display())));
        }
    }

    if let Ok(result) = Cmd::new("df")
        .args(["--output=avail", "-B1"])
        .arg_path(&config.base_dir)
        .allow_fail()
        .run()
    {
        let avail = result
            .stdout
            .lines()
            .nth(1)
            .and_then(|l| l.trim().parse::<u64>().ok());
        if let (true, Some(bytes)) = (result.success(), avail) {
            let free_gb = bytes / (1024 * 1024 * 1024);
            if free_gb < MIN_FREE_GB {
                results.push(CheckResult::warn(
                    "disk space",
                    &format!("{}GB free - build needs ~{}GB", free_gb, MIN_FREE_GB),
                ));
            } else {
                results.push(CheckResult::pass_with("disk space", &format!("{}GB free", free_gb)));
            }
        }
    }

    if config.extra_kernel_params.is_empty() {
        results.push(CheckResult::warn(
            "kernel params",
            "RESPIN_EXTRA_KERNEL_PARAMS is empty - `respin test` needs a serial console",
        ));
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_non_root_rejected() {
        assert!(require_root_uid(0).is_ok());
        let err = require_root_uid(1000).unwrap_err();
        assert!(matches!(err, BuildError::NotRoot { uid: 1000 }));
        assert!(err.to_string().contains("1000"));
    }

    #[test]
    fn test_missing_payload_reported_in_order() {
        let temp = TempDir::new().unwrap();
        let config = Config::from_vars(temp.path(), &HashMap::new());
        std::fs::create_dir_all(temp.path().join("payload")).unwrap();
        std::fs::write(temp.path().join("payload/dashboard.sh"), "#!/bin/sh\n").unwrap();

        let missing = missing_payload(&config);
        assert_eq!(missing.len(), config.payload.len() - 1);
        match require_payload(&config).unwrap_err() {
            BuildError::MissingPayload { path } => assert_eq!(path, missing[0]),
            other => panic!("unexpected error: {other}"),
        }
    }
}
