//! Filesystem management for container isolation.
//!
//! Overlay workspaces, bind mounts, and switching the process root.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
pub mod workspace;

pub use pivot_root::{RootSwitch, switch_root};
pub use workspace::{Workspace, WorkspaceManager};
