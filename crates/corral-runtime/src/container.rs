//! Container lifecycle: `run`, `stop` and `rm`.
//!
//! A run materializes the workspace, starts the init process blocked on its
//! command pipe, records the container, confines it in its cgroup, attaches
//! it to a network and only then releases the user command. A failure
//! before the release kills the init process and undoes every completed
//! step.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use corral_common::config::RuntimeLayout;
use corral_common::constants::CGROUP_PREFIX;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerId, ContainerInfo, ContainerStatus, ResourceLimits};
use corral_core::cgroup::CgroupManager;
use corral_core::filesystem::WorkspaceManager;
use corral_network::NetworkManager;

use crate::process::{self, InitProcess, Stdio};
use crate::state::{ContainerStore, validate_name};

const STOP_GRACE: Duration = Duration::from_secs(2);
const STOP_POLL: Duration = Duration::from_millis(100);
/// How long a killed process may take to disappear.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Everything `run` needs to start one container.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Attach to the terminal and wait for exit; otherwise log to
    /// `container.log` and return immediately.
    pub interactive: bool,
    /// Container name; defaults to the generated id.
    pub name: Option<String>,
    /// Image tarball name under `images/`.
    pub image: String,
    /// User command and arguments.
    pub command: Vec<String>,
    /// Optional `hostPath:containerPath` bind mount.
    pub volume: Option<String>,
    /// Cgroup limits.
    pub limits: ResourceLimits,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Network to attach to.
    pub network: Option<String>,
    /// `hostPort:containerPort` forwards, used with `network`.
    pub ports: Vec<String>,
}

/// Result of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Record as last written.
    pub info: ContainerInfo,
    /// Exit code of an interactive container; `None` when detached.
    pub exit_code: Option<i32>,
}

/// Lifecycle operations over one runtime root.
#[derive(Debug, Clone)]
pub struct ContainerRuntime {
    layout: RuntimeLayout,
    store: ContainerStore,
    workspaces: WorkspaceManager,
    networks: NetworkManager,
}

impl ContainerRuntime {
    /// Creates a runtime over `layout`.
    #[must_use]
    pub fn new(layout: RuntimeLayout) -> Self {
        Self {
            store: ContainerStore::new(layout.clone()),
            workspaces: WorkspaceManager::new(layout.clone()),
            networks: NetworkManager::new(&layout),
            layout,
        }
    }

    /// Container records.
    #[must_use]
    pub const fn store(&self) -> &ContainerStore {
        &self.store
    }

    /// Network state of this root.
    #[must_use]
    pub const fn networks(&self) -> &NetworkManager {
        &self.networks
    }

    /// Runs a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or taken, the command is
    /// empty, or any setup step fails. Setup failures leave nothing behind.
    pub fn run(&self, options: &RunOptions) -> Result<RunOutcome> {
        if options.command.is_empty() {
            return Err(CorralError::Config {
                message: "missing user command".into(),
            });
        }
        let id = ContainerId::generate();
        let name = options.name.clone().unwrap_or_else(|| id.to_string());
        validate_name(&name)?;
        if self.layout.config_file(&name).exists() {
            return Err(CorralError::Conflict {
                kind: "container",
                id: name,
            });
        }

        let workspace = match self
            .workspaces
            .create(&name, &options.image, options.volume.as_deref())
        {
            Ok(workspace) => workspace,
            Err(e) => {
                self.destroy_workspace(&name, options.volume.as_deref());
                return Err(e);
            }
        };

        let log_file = self.layout.log_file(&name);
        let stdio = if options.interactive {
            Stdio::Terminal
        } else {
            Stdio::Log(&log_file)
        };
        let (init, pipe) = match process::launch(&name, workspace.root(), stdio, &options.env) {
            Ok(launched) => launched,
            Err(e) => {
                self.destroy_workspace(&name, options.volume.as_deref());
                return Err(e);
            }
        };

        let mut info = ContainerInfo {
            pid: Some(init.pid()),
            id,
            name,
            command: options.command.join(" "),
            create_time: ContainerInfo::now_timestamp(),
            status: ContainerStatus::Running,
            volume: options.volume.clone().unwrap_or_default(),
            port_mapping: options.ports.clone(),
            image: options.image.clone(),
            network: None,
            ip_address: None,
        };

        if let Err(e) = self
            .configure(&mut info, options)
            .and_then(|()| pipe.send(&options.command))
        {
            tracing::error!(container = %info.name, error = %e, "setup failed, rolling back");
            terminate(init);
            if let Err(cleanup) = self.teardown(&info) {
                tracing::warn!(container = %info.name, error = %cleanup, "rollback incomplete");
            }
            return Err(e);
        }
        tracing::info!(container = %info.name, pid = init.pid(), "container running");

        if !options.interactive {
            return Ok(RunOutcome {
                info,
                exit_code: None,
            });
        }

        self.wait_and_teardown(info, || init.wait())
    }

    /// Waits for an interactive container, then tears it down. A failed
    /// wait kills the process and still tears everything down.
    fn wait_and_teardown(
        &self,
        mut info: ContainerInfo,
        wait: impl FnOnce() -> Result<i32>,
    ) -> Result<RunOutcome> {
        let waited = wait();
        match &waited {
            Ok(code) => tracing::info!(container = %info.name, code, "container exited"),
            Err(e) => {
                tracing::error!(container = %info.name, error = %e, "lost track of container, killing it");
                if let Some(pid) = info.pid {
                    kill_quietly(pid);
                }
            }
        }
        let torn_down = self.teardown(&info);
        let code = waited?;
        torn_down?;
        info.status = ContainerStatus::Stopped;
        info.pid = None;
        Ok(RunOutcome {
            info,
            exit_code: Some(code),
        })
    }

    /// Records, confines and connects a launched container.
    fn configure(&self, info: &mut ContainerInfo, options: &RunOptions) -> Result<()> {
        self.store.save(info)?;

        let pid = info.pid.unwrap_or_default();
        let cgroup = cgroup_for(&info.name)?;
        cgroup.set(&options.limits)?;
        cgroup.apply(pid)?;

        if let Some(network) = options.network.as_deref() {
            let endpoint = self.networks.connect(network, info)?;
            info.network = Some(network.to_owned());
            info.ip_address = Some(endpoint.ip.to_string());
            self.store.save(info)?;
        }
        Ok(())
    }

    /// Stops container `name` and records it as stopped.
    ///
    /// The process gets `SIGTERM` and, if still alive after a short grace
    /// period, `SIGKILL`. The record is only updated once the process is
    /// gone. A process that is already gone only updates the record.
    ///
    /// # Errors
    ///
    /// Returns an error if the container does not exist, the signal cannot
    /// be delivered, the process outlives `SIGKILL`, or the record cannot be
    /// updated.
    pub fn stop(&self, name: &str) -> Result<ContainerInfo> {
        let info = self.store.load(name)?;
        if let Some(pid) = info.pid {
            signal_and_wait(pid)?;
        }
        let info = self.store.mark_stopped(name)?;
        tracing::info!(container = name, "container stopped");
        Ok(info)
    }

    /// Removes a stopped container: network attachment, cgroup, workspace
    /// and record.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Conflict`] if the container is still running,
    /// or the first teardown failure after all steps ran.
    pub fn remove(&self, name: &str) -> Result<()> {
        let info = self.store.load(name)?;
        if let (ContainerStatus::Running, Some(pid)) = (info.status, info.pid)
            && is_alive(pid)
        {
            return Err(CorralError::Conflict {
                kind: "running container",
                id: name.to_owned(),
            });
        }
        self.teardown(&info)?;
        tracing::info!(container = name, "container removed");
        Ok(())
    }

    /// Undoes everything `run` set up for `info`, newest first.
    ///
    /// The record is only removed when every other step succeeded, so a
    /// failed teardown can be retried with `rm`.
    fn teardown(&self, info: &ContainerInfo) -> Result<()> {
        let mut first = None;
        let mut step = |what: &str, result: Result<()>| {
            if let Err(e) = result {
                tracing::error!(container = %info.name, step = what, error = %e, "teardown step failed");
                first.get_or_insert(e);
            }
        };

        step("disconnect network", self.networks.disconnect(info));
        step("destroy cgroup", cgroup_for(&info.name).and_then(|c| c.destroy()));
        step(
            "destroy workspace",
            self.workspaces.destroy(&info.name, info.volume()),
        );
        if let Some(e) = first {
            tracing::warn!(container = %info.name, "record kept for a later rm");
            return Err(e);
        }
        self.store.remove(&info.name)
    }

    fn destroy_workspace(&self, name: &str, volume: Option<&str>) {
        if let Err(e) = self.workspaces.destroy(name, volume) {
            tracing::warn!(container = name, error = %e, "workspace left behind");
            return;
        }
        if let Err(e) = self.store.remove(name) {
            tracing::warn!(container = name, error = %e, "container directory left behind");
        }
    }
}

fn cgroup_for(name: &str) -> Result<CgroupManager> {
    CgroupManager::new(format!("{CGROUP_PREFIX}{name}"))
}

/// Kills an init process that never received its command and reaps it.
fn terminate(init: InitProcess) {
    if let Err(e) = kill(Pid::from_raw(init.pid()), Signal::SIGKILL) {
        tracing::warn!(pid = init.pid(), error = %e, "cannot kill init process");
        return;
    }
    if let Err(e) = init.wait() {
        tracing::warn!(pid = init.pid(), error = %e, "cannot reap init process");
    }
}

/// `SIGKILL` without caring whether the process is still there.
fn kill_quietly(pid: i32) {
    match kill(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "cannot kill process"),
    }
}

/// Sends `SIGTERM`, then `SIGKILL` once the grace period is over, and
/// returns once the process is gone.
///
/// PID 1 of a namespace ignores `SIGTERM` unless it installed a handler,
/// hence the escalation.
fn signal_and_wait(pid: i32) -> Result<()> {
    let target = Pid::from_raw(pid);
    match kill(target, Signal::SIGTERM) {
        Ok(()) => tracing::info!(pid, "sent SIGTERM"),
        Err(Errno::ESRCH) => {
            tracing::warn!(pid, "process already gone");
            return Ok(());
        }
        Err(e) => return Err(CorralError::syscall(format!("signal pid {pid}"), e)),
    }
    if wait_for_exit(pid, STOP_GRACE) {
        return Ok(());
    }
    match kill(target, Signal::SIGKILL) {
        Ok(()) => tracing::info!(pid, "sent SIGKILL"),
        Err(Errno::ESRCH) => return Ok(()),
        Err(e) => return Err(CorralError::syscall(format!("kill pid {pid}"), e)),
    }
    if wait_for_exit(pid, KILL_GRACE) {
        return Ok(());
    }
    Err(CorralError::syscall(
        format!("wait for pid {pid} to exit"),
        Errno::ETIMEDOUT,
    ))
}

/// Polls until `pid` is gone or `timeout` has passed.
fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_alive(pid) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(STOP_POLL);
    }
}

/// Returns `true` if `pid` still exists and has not exited. A zombie only
/// waits for its parent to reap it and counts as gone.
fn is_alive(pid: i32) -> bool {
    if matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH)) {
        return false;
    }
    !std::fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
        stat.rsplit_once(')')
            .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> (tempfile::TempDir, ContainerRuntime) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let runtime = ContainerRuntime::new(RuntimeLayout::new(tmp.path()));
        (tmp, runtime)
    }

    fn stopped(name: &str) -> ContainerInfo {
        ContainerInfo {
            pid: None,
            id: ContainerId::new("0123456789ab"),
            name: name.into(),
            command: "top".into(),
            create_time: ContainerInfo::now_timestamp(),
            status: ContainerStatus::Stopped,
            volume: String::new(),
            port_mapping: Vec::new(),
            image: "busybox".into(),
            network: None,
            ip_address: None,
        }
    }

    #[test]
    fn empty_command_is_rejected() {
        let (_tmp, runtime) = runtime();
        let err = runtime
            .run(&RunOptions {
                image: "busybox".into(),
                ..RunOptions::default()
            })
            .expect_err("no command");
        assert!(err.to_string().contains("missing user command"));
    }

    #[test]
    fn taken_name_is_a_conflict() {
        let (_tmp, runtime) = runtime();
        runtime.store().save(&stopped("web")).expect("save");
        let err = runtime
            .run(&RunOptions {
                name: Some("web".into()),
                image: "busybox".into(),
                command: vec!["top".into()],
                ..RunOptions::default()
            })
            .expect_err("taken");
        assert!(matches!(err, CorralError::Conflict { .. }));
    }

    #[test]
    fn missing_image_leaves_no_container_directory() {
        let (tmp, runtime) = runtime();
        let err = runtime
            .run(&RunOptions {
                name: Some("web".into()),
                image: "ghost".into(),
                command: vec!["top".into()],
                ..RunOptions::default()
            })
            .expect_err("no image");
        assert!(err.is_not_found());
        assert!(!RuntimeLayout::new(tmp.path()).container_dir("web").exists());
    }

    #[test]
    fn stop_of_unknown_container_is_not_found() {
        let (_tmp, runtime) = runtime();
        assert!(runtime.stop("ghost").expect_err("unknown").is_not_found());
    }

    #[test]
    fn stop_without_pid_only_updates_the_record() {
        let (_tmp, runtime) = runtime();
        let mut info = stopped("web");
        info.status = ContainerStatus::Running;
        runtime.store().save(&info).expect("save");

        let info = runtime.stop("web").expect("stop");
        assert_eq!(info.status, ContainerStatus::Stopped);
        assert_eq!(
            runtime.store().load("web").expect("load").status,
            ContainerStatus::Stopped
        );
    }

    #[test]
    fn running_container_cannot_be_removed() {
        let (_tmp, runtime) = runtime();
        let mut info = stopped("web");
        info.status = ContainerStatus::Running;
        info.pid = Some(i32::try_from(std::process::id()).expect("pid"));
        runtime.store().save(&info).expect("save");

        let err = runtime.remove("web").expect_err("running");
        assert!(matches!(err, CorralError::Conflict { .. }));
        assert!(runtime.store().load("web").is_ok());
    }

    #[test]
    fn own_process_is_alive() {
        assert!(is_alive(i32::try_from(std::process::id()).expect("pid")));
    }

    #[test]
    fn failed_workspace_teardown_keeps_record_and_data() {
        let (tmp, runtime) = runtime();
        let layout = RuntimeLayout::new(tmp.path());
        runtime.store().save(&stopped("web")).expect("save");
        let precious = layout.merged_dir("web").join("precious");
        std::fs::create_dir_all(layout.merged_dir("web")).expect("mkdir");
        std::fs::write(&precious, b"user data").expect("write");

        let err = runtime.remove("web").expect_err("merged dir not empty");
        assert!(matches!(err, CorralError::Io { .. }));
        assert!(precious.exists());
        assert!(runtime.store().load("web").is_ok());
    }

    #[test]
    fn failed_wait_still_tears_down() {
        let (tmp, runtime) = runtime();
        let mut info = stopped("web");
        info.status = ContainerStatus::Running;
        info.pid = Some(i32::MAX);
        runtime.store().save(&info).expect("save");

        let err = runtime
            .wait_and_teardown(info, || Err(CorralError::syscall("waitpid", Errno::ECHILD)))
            .expect_err("wait failed");
        assert!(matches!(err, CorralError::Syscall { .. }));
        assert!(runtime.store().load("web").expect_err("gone").is_not_found());
        assert!(!RuntimeLayout::new(tmp.path()).container_dir("web").exists());
    }

    #[test]
    fn stop_escalates_and_returns_only_after_exit() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = std::process::Command::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .expect("spawn");
        let pid = i32::try_from(child.id()).expect("pid");
        std::thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        signal_and_wait(pid).expect("stopped");
        assert!(started.elapsed() >= STOP_GRACE);
        assert!(!is_alive(pid));
        let status = child.wait().expect("reap");
        assert_eq!(status.signal(), Some(Signal::SIGKILL as i32));
    }
}
