//! `OverlayFS` management for layered container filesystems.
//!
//! Stacks read-only lower layers with a single writable upper layer,
//! giving each container a copy-on-write view of its image.

use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};

/// Configuration for an `OverlayFS` mount.
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// Read-only lower layers (top to bottom).
    pub lower_dirs: Vec<PathBuf>,
    /// Writable upper layer directory.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Final merged mount point.
    pub merged_dir: PathBuf,
}

impl OverlayConfig {
    /// Renders the `lowerdir=…,upperdir=…,workdir=…` mount data.
    #[must_use]
    pub fn mount_options(&self) -> String {
        let lowers = self
            .lower_dirs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        format!(
            "lowerdir={},upperdir={},workdir={}",
            lowers,
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }
}

/// Mounts an `OverlayFS` with the given configuration.
///
/// All four directories must already exist.
///
/// # Errors
///
/// Returns an error if the mount syscall fails.
pub fn mount_overlay(config: &OverlayConfig) -> Result<()> {
    use nix::mount::{MsFlags, mount};

    let opts = config.mount_options();
    mount(
        Some("overlay"),
        &config.merged_dir,
        Some("overlay"),
        MsFlags::empty(),
        Some(opts.as_str()),
    )
    .map_err(|e| CorralError::syscall(format!("overlay mount at {}", config.merged_dir.display()), e))?;

    tracing::info!(merged = %config.merged_dir.display(), "overlayfs mounted");
    Ok(())
}

/// Unmounts an `OverlayFS` at the given path.
///
/// Uses `MNT_DETACH` to lazily detach the filesystem. A path with nothing
/// mounted on it is left alone.
///
/// # Errors
///
/// Returns an error if the unmount syscall fails.
pub fn unmount_overlay(merged_dir: &Path) -> Result<()> {
    if super::mount::unmount_if_mounted(merged_dir)? {
        tracing::info!(path = %merged_dir.display(), "overlayfs unmounted");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_name_every_layer() {
        let config = OverlayConfig {
            lower_dirs: vec![PathBuf::from("/c/lowerLayer/busybox")],
            upper_dir: PathBuf::from("/c/upperLayer"),
            work_dir: PathBuf::from("/c/workLayer"),
            merged_dir: PathBuf::from("/c/mnt"),
        };
        assert_eq!(
            config.mount_options(),
            "lowerdir=/c/lowerLayer/busybox,upperdir=/c/upperLayer,workdir=/c/workLayer"
        );
    }

    #[test]
    fn multiple_lowers_are_colon_joined() {
        let config = OverlayConfig {
            lower_dirs: vec![PathBuf::from("/a"), PathBuf::from("/b")],
            upper_dir: PathBuf::from("/u"),
            work_dir: PathBuf::from("/w"),
            merged_dir: PathBuf::from("/m"),
        };
        assert!(config.mount_options().starts_with("lowerdir=/a:/b,"));
    }
}
