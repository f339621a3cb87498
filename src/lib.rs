//! respin: remaster a live ISO into a customized, bootable hybrid image.
//!
//! The pipeline (see [`pipeline::run`]) resets the workspace, fetches and
//! unpacks a reference image, patches its boot menus, customizes the live
//! root inside a chroot and assembles a new BIOS/UEFI hybrid ISO.

pub mod bootcfg;
pub mod chroot;
pub mod clean;
pub mod commands;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod iso;
pub mod mounts;
pub mod payload;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod qemu;
pub mod squashfs;
pub mod timing;
pub mod workspace;

pub use error::{BuildError, BuildResult, Stage};
