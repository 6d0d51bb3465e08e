//! Mount utilities for container filesystem setup.
//!
//! Thin wrappers over `mount(2)`/`umount2(2)` that attach the failing step
//! and path to the error.

use std::path::Path;

use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};

use corral_common::error::{CorralError, Result};

/// Bind-mounts `source` onto `target`, recursively and read-write.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| CorralError::syscall(format!("bind mount {}", target.display()), e))?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}

/// Changes the propagation type of the mount tree at `path`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn set_propagation(path: &Path, propagation: MsFlags) -> Result<()> {
    mount(
        None::<&str>,
        path,
        None::<&str>,
        propagation | MsFlags::MS_REC,
        None::<&str>,
    )
    .map_err(|e| CorralError::syscall(format!("set propagation of {}", path.display()), e))
}

/// Lazily detaches whatever is mounted at `path`.
///
/// # Errors
///
/// Returns an error if the `umount2(2)` syscall fails.
pub fn unmount(path: &Path) -> Result<()> {
    umount2(path, MntFlags::MNT_DETACH)
        .map_err(|e| CorralError::syscall(format!("unmount {}", path.display()), e))?;
    tracing::debug!(path = %path.display(), "unmounted");
    Ok(())
}

/// Like [`unmount`], but a missing path or one with nothing mounted on it
/// is not an error. Returns whether something was detached.
///
/// # Errors
///
/// Returns an error if the `umount2(2)` syscall fails for another reason.
pub fn unmount_if_mounted(path: &Path) -> Result<bool> {
    match umount2(path, MntFlags::MNT_DETACH) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "unmounted");
            Ok(true)
        }
        Err(Errno::EINVAL | Errno::ENOENT) => Ok(false),
        Err(e) => Err(CorralError::syscall(format!("unmount {}", path.display()), e)),
    }
}

/// Mounts a restricted `/proc` at `target`.
///
/// # Errors
///
/// Returns an error if the target cannot be created or the mount fails.
pub fn mount_proc(target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::MS_NOEXEC | MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        None::<&str>,
    )
    .map_err(|e| CorralError::syscall("mount /proc", e))
}

/// Mounts a `tmpfs` at `target` for device nodes.
///
/// # Errors
///
/// Returns an error if the target cannot be created or the mount fails.
pub fn mount_dev(target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| CorralError::io(target, e))?;
    mount(
        Some("tmpfs"),
        target,
        Some("tmpfs"),
        MsFlags::MS_NOSUID | MsFlags::MS_STRICTATIME,
        Some("mode=755"),
    )
    .map_err(|e| CorralError::syscall("mount /dev", e))
}

/// Mounts `/proc` and `/dev` inside the freshly switched root.
///
/// A container without them still starts, so failures are only logged.
pub fn mount_essential_filesystems() {
    if let Err(e) = mount_proc(Path::new("/proc")) {
        tracing::error!(error = %e, "container will run without /proc");
    }
    if let Err(e) = mount_dev(Path::new("/dev")) {
        tracing::error!(error = %e, "container will run without /dev");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmounting_a_missing_path_is_a_noop() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let detached = unmount_if_mounted(&tmp.path().join("gone")).expect("noop");
        assert!(!detached);
    }
}
