//! Root filesystem switching.
//!
//! [`switch_root`] prefers `pivot_root(2)`, which replaces the root mount
//! so the old root can be detached entirely, and falls back to a plain
//! `chroot(2)` whenever the environment does not allow it:
//!
//! 1. inside a user namespace, `chroot` directly;
//! 2. otherwise enter a new mount namespace, make `/` a recursive slave and
//!    bind the new root onto itself unless it already is a mount point;
//! 3. `pivot_root` into it, then detach the old root;
//! 4. on a failed bind, pivot directory or pivot, `chroot`.

use std::path::{Path, PathBuf};

use nix::mount::MsFlags;

use corral_common::error::{CorralError, Result};

use super::mount::{bind_mount, set_propagation, unmount};
use crate::mountinfo::is_mount_point;
use crate::namespace::mount::create_mount_namespace;
use crate::namespace::user::running_in_user_ns;

/// How the root was switched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSwitch {
    /// The old root was pivoted away and detached.
    PivotRoot,
    /// Only the process's view of `/` changed.
    Chroot,
}

/// Makes `new_root` the root directory of the calling process.
///
/// Must run in a single-threaded process: it unshares the mount namespace.
///
/// # Errors
///
/// Returns an error naming the failed step. A failed `pivot_root` is not
/// an error on its own; the function falls back to `chroot` instead.
pub fn switch_root(new_root: &Path) -> Result<RootSwitch> {
    if running_in_user_ns() {
        tracing::debug!("user namespace detected, using chroot");
        real_chroot(new_root)?;
        return Ok(RootSwitch::Chroot);
    }

    create_mount_namespace()?;
    set_propagation(Path::new("/"), MsFlags::MS_SLAVE)?;

    if !is_mount_point(new_root)? {
        if let Err(e) = bind_mount(new_root, new_root) {
            tracing::warn!(error = %e, "cannot bind new root, falling back to chroot");
            real_chroot(new_root)?;
            return Ok(RootSwitch::Chroot);
        }
    }

    let mut pivot_dir = match PivotDir::create(new_root) {
        Ok(dir) => dir,
        Err(e) => {
            tracing::warn!(error = %e, "cannot create pivot directory, falling back to chroot");
            real_chroot(new_root)?;
            return Ok(RootSwitch::Chroot);
        }
    };
    if let Err(e) = nix::unistd::pivot_root(new_root, &pivot_dir.path) {
        tracing::warn!(error = %e, "pivot_root refused, falling back to chroot");
        drop(pivot_dir);
        real_chroot(new_root)?;
        return Ok(RootSwitch::Chroot);
    }
    pivot_dir.relocated();

    nix::unistd::chdir("/").map_err(|e| CorralError::syscall("chdir to new root", e))?;
    set_propagation(&pivot_dir.path, MsFlags::MS_PRIVATE)?;
    unmount(&pivot_dir.path)?;
    pivot_dir.mounted = false;

    tracing::info!("root switched with pivot_root");
    Ok(RootSwitch::PivotRoot)
}

/// Plain `chroot(path)` followed by `chdir("/")`.
///
/// # Errors
///
/// Returns an error if either call fails.
pub fn real_chroot(path: &Path) -> Result<()> {
    nix::unistd::chroot(path)
        .map_err(|e| CorralError::syscall(format!("chroot {}", path.display()), e))?;
    nix::unistd::chdir("/").map_err(|e| CorralError::syscall("chdir after chroot", e))?;
    tracing::info!(root = %path.display(), "root switched with chroot");
    Ok(())
}

/// Temporary mount point receiving the old root.
///
/// Dropping it unmounts the old root if still attached and removes the
/// directory, so it never outlives [`switch_root`] on any branch.
struct PivotDir {
    path: PathBuf,
    mounted: bool,
}

impl PivotDir {
    fn create(new_root: &Path) -> Result<Self> {
        let path = new_root.join(format!(".pivot_root{}", std::process::id()));
        std::fs::create_dir(&path).map_err(|e| CorralError::io(&path, e))?;
        Ok(Self {
            path,
            mounted: false,
        })
    }

    /// Follows the directory to where it lives after the pivot.
    fn relocated(&mut self) {
        if let Some(name) = self.path.file_name() {
            self.path = Path::new("/").join(name);
        }
        self.mounted = true;
    }
}

impl Drop for PivotDir {
    fn drop(&mut self) {
        if self.mounted {
            if let Err(e) = unmount(&self.path) {
                tracing::error!(error = %e, "old root still mounted");
                return;
            }
        }
        match std::fs::remove_dir(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::error!(path = %self.path.display(), error = %e, "cannot remove pivot directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivot_dir_is_removed_on_drop() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = PivotDir::create(tmp.path()).expect("create");
        let path = dir.path.clone();
        assert!(path.is_dir());
        drop(dir);
        assert!(!path.exists());
    }

    #[test]
    fn pivot_dir_relocates_under_new_root() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut dir = PivotDir::create(tmp.path()).expect("create");
        let host_path = dir.path.clone();
        dir.relocated();
        assert_eq!(
            dir.path,
            Path::new("/").join(host_path.file_name().expect("name"))
        );
        dir.mounted = false;
        dir.path = host_path;
    }

    #[test]
    fn pivot_dir_creation_fails_without_a_root_directory() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let err = PivotDir::create(&tmp.path().join("missing")).err().expect("no root");
        assert!(matches!(err, CorralError::Io { .. }));
    }

    /// Runs the switch in a forked child so the test process keeps its root.
    #[test]
    #[ignore = "requires root"]
    #[allow(unsafe_code)]
    fn switch_leaves_no_pivot_directory_behind() {
        use nix::sys::wait::{WaitStatus, waitpid};
        use nix::unistd::{ForkResult, fork};

        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("marker"), "inside").expect("write");

        // SAFETY: the child only performs syscalls and exits.
        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                let ok = switch_root(tmp.path()).is_ok()
                    && Path::new("/marker").exists()
                    && std::env::current_dir().is_ok_and(|d| d == Path::new("/"))
                    && std::fs::read_dir("/").is_ok_and(|entries| {
                        entries.flatten().all(|e| {
                            !e.file_name().to_string_lossy().starts_with(".pivot_root")
                        })
                    });
                std::process::exit(i32::from(!ok));
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).expect("wait");
                assert_eq!(status, WaitStatus::Exited(child, 0));
            }
        }
        let leftovers = std::fs::read_dir(tmp.path())
            .expect("read")
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().starts_with(".pivot_root"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    #[ignore = "requires root"]
    #[allow(unsafe_code)]
    fn blocked_pivot_directory_falls_back_to_chroot() {
        use nix::sys::wait::{WaitStatus, waitpid};
        use nix::unistd::{ForkResult, fork};

        let tmp = tempfile::tempdir().expect("tempdir");
        std::fs::write(tmp.path().join("marker"), "inside").expect("write");

        // SAFETY: the child only performs syscalls and exits.
        match unsafe { fork() }.expect("fork") {
            ForkResult::Child => {
                let blocker = tmp.path().join(format!(".pivot_root{}", std::process::id()));
                let ok = std::fs::write(&blocker, b"").is_ok()
                    && switch_root(tmp.path()).is_ok_and(|how| how == RootSwitch::Chroot)
                    && Path::new("/marker").exists();
                std::process::exit(i32::from(!ok));
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).expect("wait");
                assert_eq!(status, WaitStatus::Exited(child, 0));
            }
        }
    }
}
