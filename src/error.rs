//! Stage-tagged pipeline errors.
//!
//! Internal helpers return `anyhow::Result`; each stage maps its failure into
//! one of these variants so the user always sees which stage broke and on
//! what tool, file or mount.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preflight,
    Reset,
    Acquire,
    ExtractImage,
    ExtractRootfs,
    PatchBoot,
    InjectPayload,
    Customize,
    Repackage,
    Assemble,
}

impl Stage {
    pub const ALL: [Stage; 10] = [
        Stage::Preflight,
        Stage::Reset,
        Stage::Acquire,
        Stage::ExtractImage,
        Stage::ExtractRootfs,
        Stage::PatchBoot,
        Stage::InjectPayload,
        Stage::Customize,
        Stage::Repackage,
        Stage::Assemble,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Preflight => "preflight",
            Stage::Reset => "workspace reset",
            Stage::Acquire => "source acquisition",
            Stage::ExtractImage => "image extraction",
            Stage::ExtractRootfs => "rootfs extraction",
            Stage::PatchBoot => "boot config patch",
            Stage::InjectPayload => "payload injection",
            Stage::Customize => "isolated customization",
            Stage::Repackage => "repackaging",
            Stage::Assemble => "image assembly",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("[preflight] required tool '{tool}' not found in PATH (install the '{package}' package)")]
    MissingTool { tool: String, package: String },

    #[error("[preflight] must run as root (mount and chroot need it), effective uid is {uid}")]
    NotRoot { uid: u32 },

    #[error("[preflight] payload file missing: {}", .path.display())]
    MissingPayload { path: PathBuf },

    #[error("[workspace reset] could not remove {}: {cause:#}", .path.display())]
    Reset { path: PathBuf, cause: anyhow::Error },

    #[error(
        "[workspace reset] refusing to delete {}: still mounted: {}",
        .root.display(),
        .mounts.iter().map(|m| m.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    StaleMounts { root: PathBuf, mounts: Vec<PathBuf> },

    #[error("[source acquisition] could not fetch {url}: {cause:#}")]
    Acquisition { url: String, cause: anyhow::Error },

    #[error("[{stage}] {cause:#}")]
    Extraction { stage: Stage, cause: anyhow::Error },

    #[error("[rootfs extraction] no *.squashfs archive found under {}; unexpected reference image layout", .tree.display())]
    MissingArchive { tree: PathBuf },

    #[error("[boot config patch] {}: {cause:#}", .path.display())]
    Patch { path: PathBuf, cause: anyhow::Error },

    #[error("[payload injection] {} -> {}: {cause:#}", .source_path.display(), .dest.display())]
    Payload {
        source_path: PathBuf,
        dest: PathBuf,
        cause: anyhow::Error,
    },

    #[error("[isolated customization] {cause:#}")]
    IsolatedExecution { cause: anyhow::Error },

    #[error("[repackaging] {cause:#}")]
    Repackage { cause: anyhow::Error },

    #[error("[image assembly] {cause:#}")]
    Assembly { cause: anyhow::Error },
}

impl BuildError {
    /// The stage this failure belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            BuildError::MissingTool { .. }
            | BuildError::NotRoot { .. }
            | BuildError::MissingPayload { .. } => Stage::Preflight,
            BuildError::Reset { .. } | BuildError::StaleMounts { .. } => Stage::Reset,
            BuildError::Acquisition { .. } => Stage::Acquire,
            BuildError::Extraction { stage, .. } => *stage,
            BuildError::MissingArchive { .. } => Stage::ExtractRootfs,
            BuildError::Patch { .. } => Stage::PatchBoot,
            BuildError::Payload { .. } => Stage::InjectPayload,
            BuildError::IsolatedExecution { .. } => Stage::Customize,
            BuildError::Repackage { .. } => Stage::Repackage,
            BuildError::Assembly { .. } => Stage::Assemble,
        }
    }
}

pub type BuildResult<T> = std::result::Result<T, BuildError>;
