//! Cgroup resource management.
//!
//! One container owns one relative cgroup path (a single directory name).
//! Each [`Subsystem`] discovers its own hierarchy from the mount table and
//! resolves that path to a sibling directory underneath it: a v1 controller
//! mount when one exists, the unified `cgroup2` mount otherwise.
//!
//! [`CgroupManager`] applies every operation to all registered subsystems.
//! The controllers are independent, so a failure in one does not stop the
//! others; the first error is returned once all of them have run.

pub mod cpu;
pub mod cpuset;
pub mod memory;

use std::fmt;
use std::path::{Path, PathBuf};

use corral_common::error::{CorralError, Result};
use corral_common::types::ResourceLimits;

use crate::mountinfo::MountTable;

/// Cgroup hierarchy flavour a subsystem directory lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CgroupVersion {
    /// Per-controller v1 hierarchy.
    V1,
    /// Unified v2 hierarchy.
    V2,
}

/// A resolved cgroup directory for one subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupDir {
    /// Absolute directory path.
    pub path: PathBuf,
    /// Hierarchy the directory belongs to.
    pub version: CgroupVersion,
}

/// Resource controllers the runtime knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// CPU weight (`cpu.shares` / `cpu.weight`).
    Cpu,
    /// CPU affinity (`cpuset.cpus`).
    CpuSet,
    /// Memory ceiling (`memory.limit_in_bytes` / `memory.max`).
    Memory,
}

impl Subsystem {
    /// Every registered subsystem, in application order.
    pub const ALL: [Self; 3] = [Self::Cpu, Self::CpuSet, Self::Memory];

    /// Controller name as it appears in mount options.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::CpuSet => "cpuset",
            Self::Memory => "memory",
        }
    }

    /// Locates this subsystem's hierarchy root in the mount table.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if neither a v1 mount carrying
    /// the controller nor a unified mount exists.
    pub fn hierarchy(self, mounts: &MountTable) -> Result<CgroupDir> {
        if let Some(root) = mounts.cgroup_v1_mount(self.name()) {
            return Ok(CgroupDir {
                path: root.to_path_buf(),
                version: CgroupVersion::V1,
            });
        }
        mounts
            .cgroup_v2_mount()
            .map(|root| CgroupDir {
                path: root.to_path_buf(),
                version: CgroupVersion::V2,
            })
            .ok_or_else(|| CorralError::NotFound {
                kind: "cgroup mount",
                id: self.name().to_owned(),
            })
    }

    /// Resolves `cgroup_path` under this subsystem's hierarchy.
    ///
    /// With `auto_create`, a missing directory is created; concurrent
    /// creators racing on the same path both succeed.
    ///
    /// # Errors
    ///
    /// Returns an error if the hierarchy is not mounted, the directory is
    /// missing and `auto_create` is false, or creation fails.
    pub fn cgroup_dir(
        self,
        mounts: &MountTable,
        cgroup_path: &str,
        auto_create: bool,
    ) -> Result<CgroupDir> {
        let root = self.hierarchy(mounts)?;
        let dir = CgroupDir {
            path: root.path.join(cgroup_path),
            version: root.version,
        };
        if dir.path.is_dir() {
            return Ok(dir);
        }
        if !auto_create {
            return Err(CorralError::NotFound {
                kind: "cgroup",
                id: dir.path.display().to_string(),
            });
        }
        match std::fs::create_dir(&dir.path) {
            Ok(()) => {
                tracing::debug!(subsystem = %self, path = %dir.path.display(), "cgroup created");
                self.prepare_new(&root, &dir);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(CorralError::io(&dir.path, e)),
        }
        Ok(dir)
    }

    /// Best-effort initialisation of a freshly created group.
    fn prepare_new(self, root: &CgroupDir, dir: &CgroupDir) {
        let outcome = match (self, dir.version) {
            (Self::CpuSet, CgroupVersion::V1) => cpuset::inherit_from_parent(dir),
            (_, CgroupVersion::V2) => enable_controller(&root.path, self),
            _ => Ok(()),
        };
        if let Err(e) = outcome {
            tracing::warn!(subsystem = %self, error = %e, "cgroup initialisation incomplete");
        }
    }

    /// Writes this subsystem's limit, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be resolved or a control
    /// file cannot be written.
    pub fn set(self, mounts: &MountTable, cgroup_path: &str, limits: &ResourceLimits) -> Result<()> {
        let dir = self.cgroup_dir(mounts, cgroup_path, true)?;
        match self {
            Self::Cpu => limits
                .cpu_share
                .as_deref()
                .map_or(Ok(()), |v| cpu::set_cpu_shares(&dir, v)),
            Self::CpuSet => limits
                .cpu_set
                .as_deref()
                .map_or(Ok(()), |v| cpuset::set_cpus(&dir, v)),
            Self::Memory => limits
                .memory_limit
                .as_deref()
                .map_or(Ok(()), |v| memory::set_memory_limit(&dir, v)),
        }
    }

    /// Moves `pid` into this subsystem's group.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be resolved or the task
    /// file cannot be written.
    pub fn apply(self, mounts: &MountTable, cgroup_path: &str, pid: i32) -> Result<()> {
        let dir = self.cgroup_dir(mounts, cgroup_path, true)?;
        let file = match dir.version {
            CgroupVersion::V1 => "tasks",
            CgroupVersion::V2 => "cgroup.procs",
        };
        write_control(&dir.path, file, &pid.to_string())?;
        tracing::debug!(subsystem = %self, pid, "process attached");
        Ok(())
    }

    /// Removes this subsystem's group. A group that does not exist, or
    /// whose hierarchy is not mounted, is not an error.
    ///
    /// The kernel refuses to remove a group with live tasks, so the
    /// container's processes must be gone first.
    ///
    /// # Errors
    ///
    /// Returns an error if removal fails.
    pub fn remove(self, mounts: &MountTable, cgroup_path: &str) -> Result<()> {
        let dir = match self.cgroup_dir(mounts, cgroup_path, false) {
            Ok(dir) => dir,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        match std::fs::remove_dir(&dir.path) {
            Ok(()) => {
                tracing::debug!(subsystem = %self, path = %dir.path.display(), "cgroup removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CorralError::io(&dir.path, e)),
        }
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle to the cgroup of one container across all subsystems.
#[derive(Debug, Clone)]
pub struct CgroupManager {
    /// Relative path shared by every subsystem.
    path: String,
    /// Mount table used for hierarchy discovery.
    mounts: MountTable,
}

impl CgroupManager {
    /// Creates a manager for `cgroup_path`, discovering hierarchies from
    /// the running kernel.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a single directory name or the
    /// mount table cannot be read.
    pub fn new(cgroup_path: impl Into<String>) -> Result<Self> {
        Self::with_mounts(cgroup_path, MountTable::read()?)
    }

    /// Creates a manager that discovers hierarchies from `mounts`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a single directory name.
    pub fn with_mounts(cgroup_path: impl Into<String>, mounts: MountTable) -> Result<Self> {
        let path = cgroup_path.into();
        if path.is_empty() || path.contains('/') || path == "." || path == ".." {
            return Err(CorralError::Config {
                message: format!("cgroup path must be a single directory name, got {path:?}"),
            });
        }
        Ok(Self { path, mounts })
    }

    /// Relative cgroup path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Writes `limits` through every subsystem.
    ///
    /// # Errors
    ///
    /// Returns the first subsystem failure after all subsystems ran.
    pub fn set(&self, limits: &ResourceLimits) -> Result<()> {
        self.for_each("set", |s| s.set(&self.mounts, &self.path, limits))
    }

    /// Attaches `pid` in every subsystem.
    ///
    /// # Errors
    ///
    /// Returns the first subsystem failure after all subsystems ran.
    pub fn apply(&self, pid: i32) -> Result<()> {
        self.for_each("apply", |s| s.apply(&self.mounts, &self.path, pid))
    }

    /// Removes the group from every subsystem.
    ///
    /// # Errors
    ///
    /// Returns the first subsystem failure after all subsystems ran.
    pub fn destroy(&self) -> Result<()> {
        self.for_each("destroy", |s| s.remove(&self.mounts, &self.path))?;
        tracing::info!(path = %self.path, "cgroup destroyed");
        Ok(())
    }

    fn for_each(&self, op: &str, mut f: impl FnMut(Subsystem) -> Result<()>) -> Result<()> {
        let mut first = None;
        for subsystem in Subsystem::ALL {
            if let Err(e) = f(subsystem) {
                tracing::error!(%subsystem, op, cgroup = %self.path, error = %e, "cgroup operation failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

/// Writes one control file.
pub(crate) fn write_control(dir: &Path, file: &str, value: &str) -> Result<()> {
    let path = dir.join(file);
    std::fs::write(&path, value).map_err(|e| CorralError::io(path, e))
}

/// Delegates `subsystem` to children of the unified root.
fn enable_controller(root: &Path, subsystem: Subsystem) -> Result<()> {
    write_control(
        root,
        "cgroup.subtree_control",
        &format!("+{}", subsystem.name()),
    )
}
