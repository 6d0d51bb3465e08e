//! UTS namespace: the container's own hostname.

use corral_common::error::{CorralError, Result};

/// Sets the hostname inside the UTS namespace.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname).map_err(|e| CorralError::syscall("sethostname", e))?;
    tracing::debug!(hostname, "container hostname set");
    Ok(())
}
