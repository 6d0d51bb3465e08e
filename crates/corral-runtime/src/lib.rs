//! # corral-runtime
//!
//! Container lifecycle on top of the kernel primitives in `corral-core`:
//! launching the namespaced init process, the init side of the handoff,
//! container records, and the `run`/`stop`/`rm`/`exec`/`logs` operations.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod container;
pub mod exec;
pub mod init;
pub mod logs;
pub mod process;
pub mod state;

pub use container::{ContainerRuntime, RunOptions};
pub use init::run_init_process;
pub use state::ContainerStore;
