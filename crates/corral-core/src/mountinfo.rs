//! Parser for the kernel mount table (`/proc/self/mountinfo`).
//!
//! Each line has the shape
//!
//! ```text
//! 36 35 98:0 /mnt1 /mnt2 rw,noatime master:1 - ext3 /dev/root rw,errors=continue
//! ```
//!
//! where field 5 is the mount point, a variable number of optional fields
//! follows field 6, and everything after the lone `-` separator is the
//! filesystem type, the mount source, and the per-superblock options.

use std::path::{Path, PathBuf};

use corral_common::constants::MOUNTINFO_PATH;
use corral_common::error::{CorralError, Result};

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Where the filesystem is mounted.
    pub mount_point: PathBuf,
    /// Filesystem type, e.g. `cgroup` or `overlay`.
    pub fs_type: String,
    /// Mount source, e.g. `/dev/sda1`.
    pub source: String,
    /// Per-superblock options; for v1 cgroups these name the controllers.
    pub super_options: Vec<String>,
}

/// Parsed mount table.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Reads the mount table of the calling process.
    ///
    /// # Errors
    ///
    /// Returns an error if `/proc/self/mountinfo` cannot be read.
    pub fn read() -> Result<Self> {
        Self::read_from(Path::new(MOUNTINFO_PATH))
    }

    /// Reads a mount table from an arbitrary file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CorralError::io(path, e))?;
        Ok(Self::parse(&text))
    }

    /// Parses mount table text. Malformed lines are skipped.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let entries = text.lines().filter_map(parse_line).collect();
        Self { entries }
    }

    /// All entries, in mount order.
    #[must_use]
    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// Returns `true` if something is mounted exactly at `path`.
    #[must_use]
    pub fn is_mount_point(&self, path: &Path) -> bool {
        self.entries.iter().any(|e| e.mount_point == path)
    }

    /// Finds the first v1 cgroup hierarchy carrying `controller`.
    #[must_use]
    pub fn cgroup_v1_mount(&self, controller: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|e| e.fs_type == "cgroup" && e.super_options.iter().any(|o| o == controller))
            .map(|e| e.mount_point.as_path())
    }

    /// Finds the unified (v2) cgroup hierarchy.
    #[must_use]
    pub fn cgroup_v2_mount(&self) -> Option<&Path> {
        self.entries
            .iter()
            .find(|e| e.fs_type == "cgroup2")
            .map(|e| e.mount_point.as_path())
    }
}

/// Returns `true` if `path` is a mount point of the calling process.
///
/// # Errors
///
/// Returns an error if the mount table cannot be read.
pub fn is_mount_point(path: &Path) -> Result<bool> {
    Ok(MountTable::read()?.is_mount_point(path))
}

fn parse_line(line: &str) -> Option<MountEntry> {
    let fields: Vec<&str> = line.split(' ').collect();
    let separator = fields.iter().position(|f| *f == "-")?;
    if separator < 6 || fields.len() < separator + 3 {
        return None;
    }
    let super_options = fields
        .get(separator + 3)
        .map(|opts| opts.split(',').map(str::to_owned).collect())
        .unwrap_or_default();
    Some(MountEntry {
        mount_point: PathBuf::from(unescape(fields[4])),
        fs_type: fields[separator + 1].to_owned(),
        source: fields[separator + 2].to_owned(),
        super_options,
    })
}

/// Decodes the `\ooo` octal escapes the kernel uses for whitespace.
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|code| u8::from_str_radix(code, 8).ok());
            if let Some(value) = decoded {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
22 1 8:1 / / rw,relatime shared:1 - ext4 /dev/sda1 rw,errors=remount-ro
25 22 0:22 / /sys/fs/cgroup/cpu,cpuacct rw,nosuid shared:9 - cgroup cgroup rw,cpu,cpuacct
26 22 0:23 / /sys/fs/cgroup/cpuset rw,nosuid shared:10 - cgroup cgroup rw,cpuset
27 22 0:24 / /sys/fs/cgroup/memory rw,nosuid shared:11 - cgroup cgroup rw,memory
28 22 0:25 / /sys/fs/cgroup/unified rw,nosuid shared:12 - cgroup2 cgroup2 rw,nsdelegate
30 22 0:40 / /var/lib/my\\040dir rw - tmpfs tmpfs rw
garbage line
";

    #[test]
    fn parses_mount_points_and_types() {
        let table = MountTable::parse(SAMPLE);
        assert_eq!(table.entries().len(), 6);
        assert_eq!(table.entries()[0].fs_type, "ext4");
        assert_eq!(table.entries()[0].source, "/dev/sda1");
        assert!(table.is_mount_point(Path::new("/")));
        assert!(!table.is_mount_point(Path::new("/var")));
    }

    #[test]
    fn finds_v1_controllers_by_exact_option() {
        let table = MountTable::parse(SAMPLE);
        assert_eq!(
            table.cgroup_v1_mount("cpu"),
            Some(Path::new("/sys/fs/cgroup/cpu,cpuacct"))
        );
        assert_eq!(
            table.cgroup_v1_mount("cpuset"),
            Some(Path::new("/sys/fs/cgroup/cpuset"))
        );
        assert_eq!(
            table.cgroup_v1_mount("memory"),
            Some(Path::new("/sys/fs/cgroup/memory"))
        );
        assert_eq!(table.cgroup_v1_mount("pids"), None);
    }

    #[test]
    fn finds_unified_hierarchy() {
        let table = MountTable::parse(SAMPLE);
        assert_eq!(
            table.cgroup_v2_mount(),
            Some(Path::new("/sys/fs/cgroup/unified"))
        );
    }

    #[test]
    fn decodes_escaped_whitespace() {
        let table = MountTable::parse(SAMPLE);
        assert!(table.is_mount_point(Path::new("/var/lib/my dir")));
    }

    #[test]
    fn handles_missing_optional_fields() {
        let line = "40 22 0:50 / /mnt rw - overlay overlay rw,lowerdir=/a";
        let table = MountTable::parse(line);
        assert_eq!(table.entries().len(), 1);
        assert_eq!(table.entries()[0].fs_type, "overlay");
    }
}
