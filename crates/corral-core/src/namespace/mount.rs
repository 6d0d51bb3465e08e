//! Mount namespace isolation.
//!
//! Gives the calling process its own mount table, so mounts made while
//! preparing a root never reach the host.

use nix::sched::{CloneFlags, unshare};

use corral_common::error::{CorralError, Result};

/// Creates a new mount namespace for the calling process.
///
/// # Errors
///
/// Returns an error if the `unshare(CLONE_NEWNS)` syscall fails.
pub fn create_mount_namespace() -> Result<()> {
    unshare(CloneFlags::CLONE_NEWNS)
        .map_err(|e| CorralError::syscall("mount namespace creation", e))?;
    tracing::debug!("mount namespace created");
    Ok(())
}
