//! Unified error types for the corral workspace.
//!
//! Kernel failures surfaced through `nix` are converted to
//! [`std::io::Error`] and wrapped in [`CorralError::Syscall`] together with
//! the name of the step that failed.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum CorralError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration or input value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A resource with the same identity already exists.
    #[error("{kind} already exists: {id}")]
    Conflict {
        /// Type of the conflicting resource.
        kind: &'static str,
        /// Identifier of the conflicting resource.
        id: String,
    },

    /// Every address of a subnet is already allocated.
    #[error("no free address left in subnet {subnet}")]
    Exhausted {
        /// Subnet in CIDR notation.
        subnet: String,
    },

    /// A system call failed.
    #[error("{operation} failed: {source}")]
    Syscall {
        /// Description of the step that issued the call.
        operation: String,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// An external helper program failed.
    #[error("{program} failed: {message}")]
    Command {
        /// Program that was invoked.
        program: &'static str,
        /// Captured diagnostic output.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl CorralError {
    /// Builds an [`CorralError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`CorralError::Syscall`] from anything convertible into an OS error.
    pub fn syscall(operation: impl Into<String>, source: impl Into<std::io::Error>) -> Self {
        Self::Syscall {
            operation: operation.into(),
            source: source.into(),
        }
    }

    /// Returns `true` when the underlying OS error is `ENOENT`.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io { source, .. } | Self::Syscall { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, CorralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_error_names_the_operation() {
        let err = CorralError::syscall(
            "pivot_root",
            std::io::Error::from_raw_os_error(22),
        );
        assert!(err.to_string().starts_with("pivot_root failed"));
    }

    #[test]
    fn not_found_detection_covers_io_errors() {
        let err = CorralError::io(
            "/nope",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(err.is_not_found());
        let err = CorralError::Config {
            message: "bad".into(),
        };
        assert!(!err.is_not_found());
    }
}
