//! Container log access.
//!
//! A detached container's stdout and stderr go to
//! `containers/<name>/container.log`; interactive containers write to the
//! terminal and leave no log.

use corral_common::config::RuntimeLayout;
use corral_common::error::{CorralError, Result};

/// Reads the log of container `name`.
///
/// Returns an empty string if the log file does not exist yet.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn read_logs(layout: &RuntimeLayout, name: &str) -> Result<String> {
    let path = layout.log_file(name);
    match std::fs::read(&path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(CorralError::io(path, e)),
    }
}
