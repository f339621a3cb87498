//! External command execution.
//!
//! Every tool the pipeline drives (curl, xorriso, unsquashfs, mount, chroot,
//! mksquashfs) goes through [`Cmd`] so stderr is always captured into the
//! error and every invocation is traced.

use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// Result of a captured command execution.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// Exit status of the command.
    pub status: ExitStatus,
    /// Captured stdout, lossily decoded.
    pub stdout: String,
    /// Captured stderr, lossily decoded.
    pub stderr: String,
}

impl CommandResult {
    /// True if the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code, or -1 if terminated by signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    /// Stdout without surrounding whitespace.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Stderr without surrounding whitespace.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// Builder for a single external command.
pub struct Cmd {
    program: String,
    args: Vec<OsString>,
    /// Extra environment on top of the inherited one.
    envs: Vec<(String, String)>,
    /// If true, a non-zero exit is returned instead of failing.
    allow_fail: bool,
    /// Replaces the default "'<program>' failed" error prefix.
    error_prefix: Option<String>,
}

impl Cmd {
    /// Start a command for `program`, looked up in `PATH` when run.
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            allow_fail: false,
            error_prefix: None,
        }
    }

    /// Add a single argument.
    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(OsString::from(arg.as_ref()));
        self
    }

    /// Add multiple arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for arg in args {
            self.args.push(OsString::from(arg.as_ref()));
        }
        self
    }

    /// Add a path argument without lossy conversion.
    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.as_os_str().to_os_string());
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Allow non-zero exit codes without failing.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// Set the message that prefixes a failure, ahead of stderr.
    pub fn error_msg(mut self, msg: impl AsRef<str>) -> Self {
        self.error_prefix = Some(msg.as_ref().to_string());
        self
    }

    /// Printable form of the command line, for logs.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }

    fn failure_prefix(&self) -> String {
        self.error_prefix
            .clone()
            .unwrap_or_else(|| format!("'{}' failed", self.program))
    }

    /// Run the command and capture output.
    pub fn run(self) -> Result<CommandResult> {
        tracing::debug!(command = %self.display(), "run");

        let output = self
            .command()
            .output()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        let result = CommandResult {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if !self.allow_fail && !result.success() {
            let prefix = self.failure_prefix();
            let stderr = result.stderr_trimmed();
            if stderr.is_empty() {
                bail!("{} (exit code {})", prefix, result.code());
            } else {
                bail!("{} (exit code {}):\n{}", prefix, result.code(), stderr);
            }
        }

        Ok(result)
    }

    /// Run the command with inherited stdio so the user sees progress.
    pub fn run_interactive(self) -> Result<ExitStatus> {
        tracing::debug!(command = %self.display(), "run (interactive)");

        let status = self
            .command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| format!("Failed to execute '{}'. Is it installed?", self.program))?;

        if !self.allow_fail && !status.success() {
            bail!(
                "{} (exit code {})",
                self.failure_prefix(),
                status.code().unwrap_or(-1)
            );
        }

        Ok(status)
    }
}

/// Full path of a program in PATH, if any.
pub fn which(program: &str) -> Option<PathBuf> {
    which::which(program).ok()
}

/// True if `program` is found in PATH.
pub fn exists(program: &str) -> bool {
    which(program).is_some()
}
