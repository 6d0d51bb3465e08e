//! # corral-core
//!
//! Low-level Linux isolation primitives for the corral runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: clone flags for UTS, PID, mount, network and IPC
//!   isolation, and entering a network namespace from the host.
//! - **Cgroups**: CPU, cpuset and memory limits on v1 hierarchies with a
//!   unified v2 fallback.
//! - **Filesystem**: overlay workspaces, volumes, and `pivot_root` with a
//!   `chroot` fallback.
//! - **Mount table**: parsing `/proc/self/mountinfo`.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod filesystem;
pub mod mountinfo;
pub mod namespace;
