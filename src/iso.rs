//! Final image assembly.
//!
//! The reference image's first 432 bytes (the MBR boot code) become the
//! isohybrid MBR of the new image, so it still boots from USB sticks on
//! legacy BIOS. The El Torito entries point at ISOLINUX for BIOS and at the
//! FAT image holding GRUB for UEFI.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{BuildError, BuildResult};
use crate::process::Cmd;
use crate::workspace::{LocatedTree, ReferenceImage, Workspace};

/// Legacy MBR boot-code region.
pub const BOOT_SECTOR_LEN: usize = 432;

/// Paths inside the extracted tree the boot records point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootLayout {
    pub bios_image: &'static str,
    pub boot_catalog: &'static str,
    pub efi_image: &'static str,
}

pub const DEBIAN_LIVE_LAYOUT: BootLayout = BootLayout {
    bios_image: "isolinux/isolinux.bin",
    boot_catalog: "isolinux/boot.cat",
    efi_image: "boot/grub/efi.img",
};

/// Copy the first [`BOOT_SECTOR_LEN`] bytes of `image` to `template`.
pub fn extract_boot_sector(image: &Path, template: &Path) -> Result<()> {
    let mut buf = [0u8; BOOT_SECTOR_LEN];
    File::open(image)
        .with_context(|| format!("Failed to open {}", image.display()))?
        .read_exact(&mut buf)
        .with_context(|| format!("{} is shorter than {} bytes", image.display(), BOOT_SECTOR_LEN))?;
    File::create(template)
        .and_then(|mut f| f.write_all(&buf))
        .with_context(|| format!("Failed to write {}", template.display()))?;
    Ok(())
}

/// xorriso arguments for the hybrid image (after `xorriso`).
pub fn xorriso_args(
    volume_id: &str,
    template: &Path,
    layout: &BootLayout,
    tree: &Path,
    output: &Path,
) -> Vec<String> {
    let mut args: Vec<String> = [
        "-as", "mkisofs",
        // Rock Ridge + Joliet
        "-r", "-J", "-joliet-long",
        "-V", volume_id,
        "-o",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.push(output.to_string_lossy().into_owned());

    // BIOS boot
    args.extend(["-isohybrid-mbr".to_string(), template.to_string_lossy().into_owned()]);
    args.extend(
        [
            "-c", layout.boot_catalog,
            "-b", layout.bios_image,
            "-no-emul-boot",
            "-boot-load-size", "4",
            "-boot-info-table",
            // UEFI boot
            "-eltorito-alt-boot",
            "-e", layout.efi_image,
            "-no-emul-boot",
            "-isohybrid-gpt-basdat",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push(tree.to_string_lossy().into_owned());
    args
}

/// Removes the transient boot sector template on every exit path.
struct TemplateFile(PathBuf);

impl Drop for TemplateFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.0) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), "could not remove boot template: {e}");
            }
        }
    }
}

/// Build the final hybrid image.
///
/// xorriso writes to a `.partial` file that is checksummed and only then
/// renamed over the final path, so a failed run never leaves a
/// plausible-looking image.
pub fn assemble(
    ws: &Workspace,
    reference: &ReferenceImage,
    tree: &LocatedTree,
    volume_id: &str,
) -> BuildResult<PathBuf> {
    build_image(ws, reference, tree, volume_id).map_err(|cause| {
        let _ = fs::remove_file(ws.partial_output());
        let _ = fs::remove_file(ws.checksum_file());
        BuildError::Assembly { cause }
    })
}

fn build_image(
    ws: &Workspace,
    reference: &ReferenceImage,
    tree: &LocatedTree,
    volume_id: &str,
) -> Result<PathBuf> {
    let layout = &DEBIAN_LIVE_LAYOUT;
    for rel in [layout.bios_image, layout.efi_image] {
        if !tree.root.join(rel).is_file() {
            bail!("boot file {} missing from the extracted tree", rel);
        }
    }

    let _template = TemplateFile(ws.boot_template.clone());
    extract_boot_sector(&reference.path, &ws.boot_template)?;

    let partial = ws.partial_output();
    if let Some(parent) = partial.parent() {
        fs::create_dir_all(parent)?;
    }

    println!("Creating hybrid BIOS/UEFI image with xorriso...");
    Cmd::new("xorriso")
        .args(xorriso_args(volume_id, &ws.boot_template, layout, &tree.root, &partial))
        .error_msg("xorriso failed")
        .run_interactive()?;

    let digest = write_checksum(&partial, &ws.output, &ws.checksum_file())?;

    fs::rename(&partial, &ws.output).with_context(|| {
        format!("Failed to move {} to {}", partial.display(), ws.output.display())
    })?;

    println!("Created image at: {}", ws.output.display());
    println!("  SHA256: {}", digest);
    Ok(ws.output.clone())
}

/// Hash `image` and write a `sha256sum`-compatible line naming `listed_as`.
pub fn write_checksum(image: &Path, listed_as: &Path, checksum_file: &Path) -> Result<String> {
    let mut file = File::open(image)
        .with_context(|| format!("Failed to open {} for hashing", image.display()))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let digest = format!("{:x}", hasher.finalize());

    let name = listed_as
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    fs::write(checksum_file, format!("{}  {}\n", digest, name))
        .with_context(|| format!("Failed to write {}", checksum_file.display()))?;
    Ok(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_boot_sector_is_exact_prefix() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("ref.iso");
        let data: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        fs::write(&image, &data).unwrap();

        let template = temp.path().join("isohdpfx.bin");
        extract_boot_sector(&image, &template).unwrap();
        assert_eq!(fs::read(&template).unwrap(), &data[..BOOT_SECTOR_LEN]);
    }

    #[test]
    fn test_short_image_rejected() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("tiny.iso");
        fs::write(&image, [0u8; 100]).unwrap();
        assert!(extract_boot_sector(&image, &temp.path().join("t.bin")).is_err());
    }

    #[test]
    fn test_xorriso_boot_flags() {
        let args = xorriso_args(
            "RESPIN_LIVE",
            Path::new("/w/isohdpfx.bin"),
            &DEBIAN_LIVE_LAYOUT,
            Path::new("/w/iso-contents"),
            Path::new("/w/respin.iso.partial"),
        );
        let after = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].as_str()
        };

        assert_eq!(&args[..2], ["-as", "mkisofs"]);
        assert!(args.iter().any(|a| a == "-r"));
        assert!(args.iter().any(|a| a == "-J"));
        assert_eq!(after("-isohybrid-mbr"), "/w/isohdpfx.bin");
        assert_eq!(after("-c"), "isolinux/boot.cat");
        assert_eq!(after("-b"), "isolinux/isolinux.bin");
        assert_eq!(after("-boot-load-size"), "4");
        assert_eq!(after("-e"), "boot/grub/efi.img");
        assert_eq!(after("-o"), "/w/respin.iso.partial");
        assert_eq!(after("-V"), "RESPIN_LIVE");
        assert_eq!(args.last().map(String::as_str), Some("/w/iso-contents"));

        // The EFI entry must come after the alt-boot separator.
        let alt = args.iter().position(|a| a == "-eltorito-alt-boot").unwrap();
        let efi = args.iter().position(|a| a == "-e").unwrap();
        assert!(alt < efi);
    }

    #[test]
    fn test_missing_boot_files_leave_no_output() {
        let temp = TempDir::new().unwrap();
        let config = crate::config::Config::from_vars(temp.path(), &Default::default());
        let ws = Workspace::new(&config);
        fs::write(&ws.reference, vec![7u8; 4096]).unwrap();
        fs::create_dir_all(&ws.extract_dir).unwrap();

        let tree = LocatedTree {
            root: ws.extract_dir.clone(),
            archive: ws.extract_dir.join("live/filesystem.squashfs"),
        };
        let reference = ReferenceImage {
            path: ws.reference.clone(),
        };
        let err = assemble(&ws, &reference, &tree, "X").unwrap_err();
        assert!(matches!(err, BuildError::Assembly { .. }));
        assert!(!ws.output.exists());
        assert!(!ws.partial_output().exists());
        assert!(!ws.boot_template.exists());
        assert!(!ws.checksum_file().exists());
    }

    #[test]
    fn test_unhashable_image_is_error() {
        let temp = TempDir::new().unwrap();
        let sum_file = temp.path().join("respin.iso.sha256");
        let err = write_checksum(
            &temp.path().join("respin.iso.partial"),
            &temp.path().join("respin.iso"),
            &sum_file,
        )
        .unwrap_err();
        assert!(err.to_string().contains("hashing"));
        assert!(!sum_file.exists());
    }

    #[test]
    fn test_checksum_format() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("respin.iso.partial");
        fs::write(&image, b"abc").unwrap();
        let sum_file = temp.path().join("respin.iso.sha256");
        let digest = write_checksum(&image, &temp.path().join("respin.iso"), &sum_file).unwrap();
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            fs::read_to_string(&sum_file).unwrap(),
            format!("{}  respin.iso\n", digest)
        );
    }
}
