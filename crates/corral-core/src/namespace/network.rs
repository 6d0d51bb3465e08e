//! Network namespace entry.
//!
//! `setns(2)` switches the namespace of the calling *thread* only, so
//! [`run_in_netns`] does its work on a dedicated OS thread. That thread
//! enters the target namespace, runs the closure, restores its original
//! namespace and exits; nothing else is ever scheduled on it. Child
//! processes spawned from inside the closure inherit the target namespace.

use std::fs::File;
use std::path::{Path, PathBuf};

use nix::sched::{CloneFlags, setns};

use corral_common::error::{CorralError, Result};

/// Network namespace of the calling thread.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Path of the network namespace of `pid`.
#[must_use]
pub fn netns_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/net"))
}

/// Runs `f` inside the network namespace at `ns_path`.
///
/// # Errors
///
/// Returns an error if either namespace cannot be opened or entered, or
/// whatever `f` returns.
pub fn run_in_netns<T, F>(ns_path: &Path, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send,
    T: Send,
{
    let target = File::open(ns_path).map_err(|e| CorralError::io(ns_path, e))?;

    std::thread::scope(|scope| {
        let worker = scope.spawn(move || {
            let original =
                File::open(THREAD_NETNS).map_err(|e| CorralError::io(THREAD_NETNS, e))?;
            setns(&target, CloneFlags::CLONE_NEWNET)
                .map_err(|e| CorralError::syscall("enter container network namespace", e))?;
            tracing::debug!(netns = %ns_path.display(), "entered network namespace");

            let outcome = f();

            if let Err(e) = setns(&original, CloneFlags::CLONE_NEWNET) {
                tracing::error!(error = %e, "cannot restore network namespace, worker thread exits");
            }
            outcome
        });
        match worker.join() {
            Ok(outcome) => outcome,
            Err(payload) => std::panic::resume_unwind(payload),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn netns_path_points_into_proc() {
        assert_eq!(netns_path(42), Path::new("/proc/42/ns/net"));
    }

    #[test]
    fn missing_namespace_is_reported_before_spawning() {
        let err = run_in_netns(Path::new("/proc/0/ns/net"), || Ok(()))
            .expect_err("pid 0 has no namespace");
        assert!(err.is_not_found());
    }

    #[test]
    #[ignore = "requires root"]
    fn own_namespace_round_trip_runs_closure() {
        let path = netns_path(i32::try_from(std::process::id()).expect("pid"));
        let value = run_in_netns(&path, || Ok(7)).expect("run");
        assert_eq!(value, 7);
    }
}
