//! Memory ceiling control.

use corral_common::error::Result;

use super::{CgroupDir, CgroupVersion, write_control};

/// Writes the hard memory limit for a cgroup.
///
/// The value is passed through unchanged, so both byte counts and
/// suffixed forms such as `100m` reach the kernel as given.
///
/// # Errors
///
/// Returns an error if writing the control file fails.
pub fn set_memory_limit(dir: &CgroupDir, limit: &str) -> Result<()> {
    let file = match dir.version {
        CgroupVersion::V1 => "memory.limit_in_bytes",
        CgroupVersion::V2 => "memory.max",
    };
    write_control(&dir.path, file, limit)?;
    tracing::debug!(limit, file, "memory limit set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_version_specific_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let v1 = CgroupDir {
            path: tmp.path().to_path_buf(),
            version: CgroupVersion::V1,
        };
        set_memory_limit(&v1, "100m").expect("v1");
        let v2 = CgroupDir {
            path: tmp.path().to_path_buf(),
            version: CgroupVersion::V2,
        };
        set_memory_limit(&v2, "100m").expect("v2");

        let read = |f: &str| std::fs::read_to_string(tmp.path().join(f)).expect("read");
        assert_eq!(read("memory.limit_in_bytes"), "100m");
        assert_eq!(read("memory.max"), "100m");
    }
}
