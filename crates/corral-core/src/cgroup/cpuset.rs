//! CPU affinity control.

use std::path::Path;

use corral_common::error::{CorralError, Result};

use super::{CgroupDir, CgroupVersion, write_control};

/// Writes the allowed CPU list for a cgroup.
///
/// # Errors
///
/// Returns an error if writing `cpuset.cpus` fails.
pub fn set_cpus(dir: &CgroupDir, cpus: &str) -> Result<()> {
    write_control(&dir.path, "cpuset.cpus", cpus)?;
    tracing::debug!(cpus, "cpuset set");
    Ok(())
}

/// Seeds an empty v1 cpuset group with its parent's CPUs and memory nodes.
///
/// A v1 cpuset group starts with empty `cpuset.cpus` and `cpuset.mems`,
/// and the kernel refuses to attach tasks until both are populated.
///
/// # Errors
///
/// Returns an error if a control file cannot be read or written.
pub fn inherit_from_parent(dir: &CgroupDir) -> Result<()> {
    if dir.version != CgroupVersion::V1 {
        return Ok(());
    }
    let Some(parent) = dir.path.parent() else {
        return Ok(());
    };
    for file in ["cpuset.cpus", "cpuset.mems"] {
        if read_control(&dir.path, file)?.is_empty() {
            let inherited = read_control(parent, file)?;
            if !inherited.is_empty() {
                write_control(&dir.path, file, &inherited)?;
            }
        }
    }
    Ok(())
}

fn read_control(dir: &Path, file: &str) -> Result<String> {
    let path = dir.join(file);
    match std::fs::read_to_string(&path) {
        Ok(s) => Ok(s.trim().to_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(CorralError::io(path, e)),
    }
}
