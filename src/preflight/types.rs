//! Preflight check types and report.

/// Result of a single preflight check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    /// `respin build` will refuse to start.
    Fail,
    /// Only affects `respin run` / `respin test`.
    Warn,
}

impl CheckStatus {
    fn icon(self) -> &'static str {
        match self {
            CheckStatus::Pass => "✓",
            CheckStatus::Fail => "✗",
            CheckStatus::Warn => "⚠",
        }
    }

    fn label(self) -> &'static str {
        match self {
            CheckStatus::Pass => "PASS",
            CheckStatus::Fail => "FAIL",
            CheckStatus::Warn => "WARN",
        }
    }
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, details: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: details.map(str::to_string),
        }
    }

    pub fn pass(name: &str) -> Self {
        Self::new(name, CheckStatus::Pass, None)
    }

    pub fn pass_with(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Pass, Some(details))
    }

    pub fn fail(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Fail, Some(details))
    }

    pub fn warn(name: &str, details: &str) -> Self {
        Self::new(name, CheckStatus::Warn, Some(details))
    }
}

/// Results of all preflight checks.
pub struct PreflightReport {
    pub checks: Vec<CheckResult>,
}

impl PreflightReport {
    pub fn all_passed(&self) -> bool {
        self.count(CheckStatus::Fail) == 0
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    /// Print the report to stdout.
    pub fn print(&self) {
        println!("=== Preflight Check Results ===\n");

        for check in &self.checks {
            print!(
                "  {} [{}] {}",
                check.status.icon(),
                check.status.label(),
                check.name
            );
            match &check.details {
                Some(details) => println!(": {}", details),
                None => println!(),
            }
        }

        println!();
        let failed = self.count(CheckStatus::Fail);
        let warned = self.count(CheckStatus::Warn);
        println!(
            "Summary: {}/{} passed",
            self.count(CheckStatus::Pass),
            self.checks.len()
        );
        if failed > 0 {
            println!("         {} FAILED - build will not succeed", failed);
        }
        if warned > 0 {
            println!("         {} warnings", warned);
        }
    }
}
