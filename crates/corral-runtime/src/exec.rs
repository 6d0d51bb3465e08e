//! Namespace joining for executing commands in running containers.

use std::path::PathBuf;
use std::process::Command;

use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerInfo, ContainerStatus};

/// Runs `command` inside the namespaces of a running container.
///
/// Uses `nsenter` to enter the target's mount, UTS, IPC, network and PID
/// namespaces. The command sees the container's environment, read from
/// `/proc/<pid>/environ`, and shares the caller's terminal.
///
/// # Errors
///
/// Returns an error if the command is empty, the container is not
/// running, or `nsenter` cannot be started.
pub fn exec_in_container(info: &ContainerInfo, command: &[String]) -> Result<i32> {
    if command.is_empty() {
        return Err(CorralError::Config {
            message: "exec command is empty".into(),
        });
    }
    let pid = match (info.status, info.pid) {
        (ContainerStatus::Running, Some(pid)) => pid,
        _ => {
            return Err(CorralError::Config {
                message: format!("container {} is not running", info.name),
            });
        }
    };
    tracing::info!(container = %info.name, pid, cmd = ?command, "exec into container");

    let nsenter = which::which("nsenter").map_err(|_| CorralError::NotFound {
        kind: "executable",
        id: "nsenter".into(),
    })?;
    let env = container_environ(pid)?;
    let status = Command::new(nsenter)
        .args(nsenter_args(pid))
        .args(command)
        .env_clear()
        .envs(env)
        .status()
        .map_err(|e| CorralError::io("nsenter", e))?;
    Ok(status.code().unwrap_or(-1))
}

fn nsenter_args(pid: i32) -> Vec<String> {
    [
        "--target",
        &pid.to_string(),
        "--mount",
        "--uts",
        "--ipc",
        "--net",
        "--pid",
        "--",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

/// Environment of process `pid` as `(key, value)` pairs.
///
/// # Errors
///
/// Returns an error if `/proc/<pid>/environ` cannot be read.
pub fn container_environ(pid: i32) -> Result<Vec<(String, String)>> {
    let path = PathBuf::from(format!("/proc/{pid}/environ"));
    let raw = std::fs::read(&path).map_err(|e| CorralError::io(&path, e))?;
    Ok(parse_environ(&raw))
}

fn parse_environ(raw: &[u8]) -> Vec<(String, String)> {
    raw.split(|b| *b == 0)
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (key, value) = entry.split_once('=')?;
            (!key.is_empty()).then(|| (key.to_owned(), value.to_owned()))
        })
        .collect()
}
