//! Linux namespace management for container isolation.
//!
//! New namespaces are requested at `clone(2)` time through
//! [`NamespaceConfig::clone_flags`]; the submodules cover the pieces that
//! happen afterwards (unsharing the mount table, naming the host, entering
//! a network namespace from the outside).

pub mod mount;
pub mod network;
pub mod user;
pub mod uts;

use nix::sched::CloneFlags;

/// Configuration for which namespaces a container process gets.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Isolate PID namespace.
    pub pid: bool,
    /// Isolate mount namespace.
    pub mount: bool,
    /// Isolate network namespace.
    pub network: bool,
    /// Isolate IPC namespace.
    pub ipc: bool,
    /// Isolate UTS (hostname) namespace.
    pub uts: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            pid: true,
            mount: true,
            network: true,
            ipc: true,
            uts: true,
        }
    }
}

impl NamespaceConfig {
    /// Clone flags creating the configured namespaces.
    #[must_use]
    pub fn clone_flags(&self) -> CloneFlags {
        let mut flags = CloneFlags::empty();
        for (enabled, flag) in [
            (self.uts, CloneFlags::CLONE_NEWUTS),
            (self.pid, CloneFlags::CLONE_NEWPID),
            (self.mount, CloneFlags::CLONE_NEWNS),
            (self.network, CloneFlags::CLONE_NEWNET),
            (self.ipc, CloneFlags::CLONE_NEWIPC),
        ] {
            if enabled {
                flags |= flag;
            }
        }
        flags
    }
}
