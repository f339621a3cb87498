use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{BuildError, BuildResult, Stage};
use crate::process::Cmd;
use crate::workspace::{ExtractedTree, LocatedTree, MutableRoot, ReferenceImage, Workspace};

/// File suffix of the compressed root filesystem inside the image.
pub const ARCHIVE_SUFFIX: &str = ".squashfs";

/// Unpack the reference image into the extracted tree and make it writable.
pub fn extract_image(ws: &Workspace, image: &ReferenceImage) -> BuildResult<ExtractedTree> {
    let wrap = |cause| BuildError::Extraction {
        stage: Stage::ExtractImage,
        cause,
    };

    println!("Extracting {} with xorriso...", image.path.display());
    fs::create_dir_all(&ws.extract_dir)
        .with_context(|| format!("Failed to create {}", ws.extract_dir.display()))
        .map_err(wrap)?;

    Cmd::new("xorriso")
        .args(["-osirrox", "on", "-indev"])
        .arg_path(&image.path)
        .args(["-extract", "/"])
        .arg_path(&ws.extract_dir)
        .error_msg("xorriso extraction failed")
        .run()
        .map_err(wrap)?;

    // ISO contents come out read-only.
    Cmd::new("chmod")
        .args(["-R", "u+w"])
        .arg_path(&ws.extract_dir)
        .error_msg("Could not make extracted tree writable")
        .run()
        .map_err(wrap)?;

    Ok(ExtractedTree {
        root: ws.extract_dir.clone(),
    })
}

/// All `*.squashfs` files under `tree`, in traversal order.
///
/// Traversal is depth-first with entries sorted by file name, so the first
/// candidate is stable across runs.
pub fn archive_candidates(tree: &Path) -> Vec<PathBuf> {
    WalkDir::new(tree)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().ends_with(ARCHIVE_SUFFIX))
        .map(|e| e.into_path())
        .collect()
}

/// Find the compressed filesystem archive inside the extracted tree.
pub fn locate_archive(tree: ExtractedTree) -> BuildResult<LocatedTree> {
    let mut candidates = archive_candidates(&tree.root).into_iter();
    let archive = candidates.next().ok_or_else(|| BuildError::MissingArchive {
        tree: tree.root.clone(),
    })?;

    let others: Vec<PathBuf> = candidates.collect();
    if !others.is_empty() {
        tracing::warn!(
            using = %archive.display(),
            ignored = ?others,
            "more than one compressed filesystem in the image"
        );
    }

    println!("Found squashfs at: {}", archive.display());
    Ok(LocatedTree {
        root: tree.root,
        archive,
    })
}

/// Decompress the archive into the mutable root.
pub fn extract_rootfs(ws: &Workspace, tree: &LocatedTree) -> BuildResult<MutableRoot> {
    let wrap = |cause| BuildError::Extraction {
        stage: Stage::ExtractRootfs,
        cause,
    };

    println!("Unpacking {} ...", tree.archive.display());
    // unsquashfs creates the destination itself and refuses an existing one
    // without -f.
    Cmd::new("unsquashfs")
        .arg("-f")
        .arg("-d")
        .arg_path(&ws.rootfs_dir)
        .arg_path(&tree.archive)
        .error_msg("unsquashfs failed")
        .run_interactive()
        .map_err(wrap)?;

    if !ws.rootfs_dir.join("etc").is_dir() {
        return Err(wrap(anyhow::anyhow!(
            "{} has no etc/ after unsquashfs; not a root filesystem",
            ws.rootfs_dir.display()
        )));
    }

    Ok(MutableRoot {
        path: ws.rootfs_dir.clone(),
    })
}
