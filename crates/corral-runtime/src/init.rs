//! The init side of the launch handoff.
//!
//! Runs as PID 1 of the new namespaces, started by
//! [`launch`](crate::process::launch) with the merged root as its working
//! directory. It waits for the user command on descriptor 3, switches root,
//! mounts `/proc` and `/dev`, and replaces itself with the user program.

use std::convert::Infallible;
use std::ffi::CString;
use std::fs::File;
use std::io::Read;
use std::os::fd::FromRawFd;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;

use corral_common::constants::INIT_PIPE_FD;
use corral_common::error::{CorralError, Result};
use corral_core::filesystem::mount::mount_essential_filesystems;
use corral_core::filesystem::switch_root;
use corral_core::namespace::uts::set_hostname;

use crate::process::decode_command;

/// Turns the current process into the container's user program.
///
/// Only returns on failure; on success the process image is replaced.
///
/// # Errors
///
/// Returns an error if the command pipe is empty, the root switch fails,
/// the program cannot be found on `PATH`, or `execve(2)` fails.
pub fn run_init_process(name: &str) -> Result<Infallible> {
    let command = read_command()?;
    tracing::info!(container = name, ?command, "init received command");

    if let Err(e) = set_hostname(name) {
        tracing::warn!(error = %e, "keeping inherited hostname");
    }

    let root = std::env::current_dir().map_err(|e| CorralError::io(".", e))?;
    let switch = switch_root(&root)?;
    tracing::debug!(?switch, "root switched");
    mount_essential_filesystems();

    let program = resolve_program(&command[0])?;
    let argv = to_c_strings(command.iter().map(|arg| arg.as_bytes().to_vec()))?;
    let env = to_c_strings(std::env::vars_os().map(|(key, value)| {
        let mut entry = key.into_vec();
        entry.push(b'=');
        entry.extend(value.as_bytes());
        entry
    }))?;
    let program = CString::new(program.into_os_string().into_vec()).map_err(|_| {
        CorralError::Config {
            message: "program path contains a NUL byte".into(),
        }
    })?;

    nix::unistd::execve(&program, &argv, &env)
        .map_err(|e| CorralError::syscall(format!("execve {}", command[0]), e))
}

/// Reads the whole command from descriptor 3 and closes it.
fn read_command() -> Result<Vec<String>> {
    // SAFETY: descriptor 3 is set up by the launcher for this process alone
    // and is owned, then closed, by this `File`.
    let mut pipe = unsafe { File::from_raw_fd(INIT_PIPE_FD) };
    let mut payload = Vec::new();
    let _ = pipe
        .read_to_end(&mut payload)
        .map_err(|e| CorralError::io("init pipe", e))?;
    let command = decode_command(&payload);
    if command.is_empty() {
        return Err(CorralError::Config {
            message: "missing user command".into(),
        });
    }
    Ok(command)
}

fn resolve_program(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|e| CorralError::NotFound {
        kind: "executable",
        id: format!("{program} ({e})"),
    })
}

fn to_c_strings(items: impl Iterator<Item = Vec<u8>>) -> Result<Vec<CString>> {
    items
        .map(|bytes| {
            CString::new(bytes).map_err(|_| CorralError::Config {
                message: "argument or environment entry contains a NUL byte".into(),
            })
        })
        .collect()
}
