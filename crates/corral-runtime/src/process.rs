//! Launching the container's init process.
//!
//! The runtime re-executes its own binary as `init <name>` inside fresh UTS,
//! PID, mount, network and IPC namespaces. The child starts in the merged
//! root of its workspace and receives its user command over a pipe whose
//! read end sits on descriptor 3; nothing else from the parent is passed
//! along. The parent writes the command only once cgroups and networking
//! are in place, so the user program never runs unconfined.

use std::collections::BTreeMap;
use std::ffi::CString;
use std::fs::File;
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use nix::fcntl::OFlag;
use nix::sched::clone;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Pid, execve, pipe2};

use corral_common::constants::{DEFAULT_CONTAINER_PATH, INIT_PIPE_FD, INIT_SUBCOMMAND};
use corral_common::error::{CorralError, Result};
use corral_core::namespace::NamespaceConfig;

const SELF_EXE: &str = "/proc/self/exe";
const STACK_SIZE: usize = 1024 * 1024;
const EXEC_FAILED: isize = 127;

/// Where the init process sends its standard streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stdio<'a> {
    /// Inherit the caller's terminal.
    Terminal,
    /// Append stdout and stderr to this file; stdin reads `/dev/null`.
    Log(&'a Path),
}

/// A running init process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitProcess {
    pid: Pid,
}

impl InitProcess {
    /// Host pid of the process.
    #[must_use]
    pub const fn pid(self) -> i32 {
        self.pid.as_raw()
    }

    /// Blocks until the process exits and returns its exit code, or
    /// `128 + signal` when it was killed.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails.
    pub fn wait(self) -> Result<i32> {
        loop {
            match waitpid(self.pid, None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(code),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(128 + signal as i32),
                Ok(_) | Err(nix::errno::Errno::EINTR) => {}
                Err(e) => return Err(CorralError::syscall("waitpid", e)),
            }
        }
    }
}

/// Write end of the command pipe.
#[derive(Debug)]
pub struct CommandPipe(File);

impl CommandPipe {
    /// Sends the user command and closes the pipe, which releases the init
    /// process.
    ///
    /// # Errors
    ///
    /// Returns an error if the command is empty, contains a NUL byte or
    /// cannot be written.
    pub fn send(mut self, command: &[String]) -> Result<()> {
        if command.is_empty() {
            return Err(CorralError::Config {
                message: "missing user command".into(),
            });
        }
        let payload = encode_command(command)?;
        self.0
            .write_all(&payload)
            .map_err(|e| CorralError::io("init pipe", e))?;
        tracing::debug!(?command, "command sent to init");
        Ok(())
    }
}

/// Joins arguments with NUL separators.
fn encode_command(command: &[String]) -> Result<Vec<u8>> {
    if command.iter().any(|arg| arg.contains('\0')) {
        return Err(CorralError::Config {
            message: "command arguments cannot contain NUL bytes".into(),
        });
    }
    Ok(command.join("\0").into_bytes())
}

/// Splits a NUL-separated command, dropping empty fields.
#[must_use]
pub fn decode_command(payload: &[u8]) -> Vec<String> {
    payload
        .split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

/// Environment of the init process: the caller's environment overlaid with
/// `user_env` (`KEY=VALUE` entries), plus a default `PATH` when none is set.
fn container_env(user_env: &[String]) -> Result<Vec<CString>> {
    let mut vars: BTreeMap<Vec<u8>, Vec<u8>> = std::env::vars_os()
        .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect();
    for entry in user_env {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                let _ = vars.insert(key.as_bytes().to_vec(), value.as_bytes().to_vec());
            }
            _ => tracing::warn!(entry = %entry, "ignoring environment entry without KEY="),
        }
    }
    let _ = vars
        .entry(b"PATH".to_vec())
        .or_insert_with(|| DEFAULT_CONTAINER_PATH.as_bytes().to_vec());

    vars.into_iter()
        .map(|(mut key, value)| {
            key.push(b'=');
            key.extend(value);
            c_string(&key)
        })
        .collect()
}

fn c_string(bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|_| CorralError::Config {
        message: format!(
            "{} contains a NUL byte",
            String::from_utf8_lossy(bytes)
        ),
    })
}

/// Everything the child needs, prepared before `clone(2)` so the child
/// only issues syscalls.
struct ChildSetup {
    program: CString,
    argv: [CString; 3],
    env: Vec<CString>,
    cwd: CString,
    command_fd: i32,
    log_fd: Option<i32>,
    null_fd: Option<i32>,
}

impl ChildSetup {
    fn run(&self) -> isize {
        // SAFETY: plain descriptor and directory syscalls on values owned by
        // the parent, which outlive the child's copy of the address space.
        unsafe {
            if let (Some(log), Some(null)) = (self.log_fd, self.null_fd) {
                if libc::dup2(null, 0) < 0 || libc::dup2(log, 1) < 0 || libc::dup2(log, 2) < 0 {
                    return EXEC_FAILED;
                }
            }
            if self.command_fd == INIT_PIPE_FD {
                if libc::fcntl(INIT_PIPE_FD, libc::F_SETFD, 0) < 0 {
                    return EXEC_FAILED;
                }
            } else if libc::dup2(self.command_fd, INIT_PIPE_FD) < 0 {
                return EXEC_FAILED;
            }
            if libc::chdir(self.cwd.as_ptr()) < 0 {
                return EXEC_FAILED;
            }
        }
        match execve(&self.program, &self.argv, &self.env) {
            Ok(never) => match never {},
            Err(_) => EXEC_FAILED,
        }
    }
}

/// Starts `init <name>` in new namespaces with `root` as working
/// directory.
///
/// Returns the running process and the pipe its command must be sent on.
/// Until [`CommandPipe::send`] is called the child blocks before touching
/// its root.
///
/// # Errors
///
/// Returns an error if the log file, pipe or process cannot be created.
pub fn launch(
    name: &str,
    root: &Path,
    stdio: Stdio<'_>,
    user_env: &[String],
) -> Result<(InitProcess, CommandPipe)> {
    let (reader, writer): (OwnedFd, OwnedFd) =
        pipe2(OFlag::O_CLOEXEC).map_err(|e| CorralError::syscall("create init pipe", e))?;

    let (log, null) = match stdio {
        Stdio::Terminal => (None, None),
        Stdio::Log(path) => {
            let log = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| CorralError::io(path, e))?;
            let null = File::open("/dev/null").map_err(|e| CorralError::io("/dev/null", e))?;
            (Some(log), Some(null))
        }
    };

    let setup = ChildSetup {
        program: c_string(SELF_EXE.as_bytes())?,
        argv: [
            c_string(SELF_EXE.as_bytes())?,
            c_string(INIT_SUBCOMMAND.as_bytes())?,
            c_string(name.as_bytes())?,
        ],
        env: container_env(user_env)?,
        cwd: c_string(root.as_os_str().as_bytes())?,
        command_fd: reader.as_raw_fd(),
        log_fd: log.as_ref().map(AsRawFd::as_raw_fd),
        null_fd: null.as_ref().map(AsRawFd::as_raw_fd),
    };

    let mut stack = vec![0u8; STACK_SIZE];
    let flags = NamespaceConfig::default().clone_flags();
    // SAFETY: without CLONE_VM the child runs on its own copy of the address
    // space and leaves the callback only through execve or exit.
    let pid = unsafe {
        clone(
            Box::new(|| setup.run()),
            &mut stack,
            flags,
            Some(Signal::SIGCHLD as i32),
        )
    }
    .map_err(|e| CorralError::syscall("clone init process", e))?;

    drop(reader);
    tracing::info!(container = name, pid = pid.as_raw(), root = %root.display(), "init process started");
    Ok((InitProcess { pid }, CommandPipe(File::from(writer))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_survives_spaces_through_the_pipe_encoding() {
        let command = vec!["sh".to_owned(), "-c".to_owned(), "echo a b".to_owned()];
        let payload = encode_command(&command).expect("encode");
        assert_eq!(decode_command(&payload), command);
    }

    #[test]
    fn empty_fields_are_dropped_when_decoding() {
        assert_eq!(decode_command(b"\0top\0\0"), vec!["top".to_owned()]);
        assert!(decode_command(b"").is_empty());
    }

    #[test]
    fn nul_in_argument_is_rejected() {
        let err = encode_command(&["a\0b".to_owned()]).expect_err("nul");
        assert!(matches!(err, CorralError::Config { .. }));
    }

    #[test]
    fn empty_command_is_refused_before_writing() {
        let (_reader, writer) = pipe2(OFlag::O_CLOEXEC).expect("pipe");
        let err = CommandPipe(File::from(writer))
            .send(&[])
            .expect_err("empty");
        assert!(err.to_string().contains("missing user command"));
    }

    #[test]
    fn sent_command_is_readable_until_eof() {
        use std::io::Read;

        let (reader, writer) = pipe2(OFlag::O_CLOEXEC).expect("pipe");
        CommandPipe(File::from(writer))
            .send(&["/bin/ls".to_owned(), "-l".to_owned()])
            .expect("send");
        let mut payload = Vec::new();
        let _ = File::from(reader)
            .read_to_end(&mut payload)
            .expect("read");
        assert_eq!(decode_command(&payload), vec!["/bin/ls", "-l"]);
    }

    #[test]
    fn user_env_overrides_and_path_is_always_set() {
        let env = container_env(&["CORRAL_TEST_VAR=one=two".to_owned(), "broken".to_owned()])
            .expect("env");
        let rendered: Vec<String> = env
            .iter()
            .map(|c| c.to_string_lossy().into_owned())
            .collect();
        assert!(rendered.contains(&"CORRAL_TEST_VAR=one=two".to_owned()));
        assert!(rendered.iter().any(|e| e.starts_with("PATH=")));
        assert!(!rendered.iter().any(|e| e == "broken"));
    }
}
