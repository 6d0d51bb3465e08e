//! Domain primitive types used across the corral workspace.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CorralError, Result};

/// Number of characters kept from a generated identifier.
const CONTAINER_ID_LEN: usize = 12;

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random container ID.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(CONTAINER_ID_LEN);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resource limits written verbatim into cgroup control files.
///
/// `None` leaves the corresponding controller file untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling, e.g. `100m`.
    pub memory_limit: Option<String>,
    /// Relative CPU weight, e.g. `512`.
    pub cpu_share: Option<String>,
    /// CPU affinity list, e.g. `0-1`.
    pub cpu_set: Option<String>,
}

impl ResourceLimits {
    /// Builds limits from optional raw values, treating empty strings as absent.
    #[must_use]
    pub fn new(
        memory_limit: Option<String>,
        cpu_share: Option<String>,
        cpu_set: Option<String>,
    ) -> Self {
        let keep = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Self {
            memory_limit: keep(memory_limit),
            cpu_share: keep(cpu_share),
            cpu_set: keep(cpu_set),
        }
    }

    /// Returns `true` when no limit is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.memory_limit.is_none() && self.cpu_share.is_none() && self.cpu_set.is_none()
    }
}

/// Lifecycle state recorded for a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// The init process is alive.
    Running,
    /// The init process was signalled or exited.
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Persisted metadata record of a container (`config.json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    /// Host PID of the container's init process, cleared once stopped.
    pub pid: Option<i32>,
    /// Container identifier.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// User command line.
    pub command: String,
    /// Creation time, `YYYY-MM-DD HH:MM:SS`.
    pub create_time: String,
    /// Current status.
    pub status: ContainerStatus,
    /// Raw volume specification (`host:container`), empty when none.
    #[serde(default)]
    pub volume: String,
    /// Raw port mappings (`host:container`).
    #[serde(default)]
    pub port_mapping: Vec<String>,
    /// Image the container was started from.
    #[serde(default)]
    pub image: String,
    /// Network the container is attached to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Address allocated on that network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

impl ContainerInfo {
    /// Formats the current local time the way records store it.
    #[must_use]
    pub fn now_timestamp() -> String {
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// The recorded volume, if one was requested.
    #[must_use]
    pub fn volume(&self) -> Option<&str> {
        (!self.volume.is_empty()).then_some(self.volume.as_str())
    }
}

/// A `hostPath:containerPath` bind-mount request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Directory on the host.
    pub host_path: PathBuf,
    /// Directory inside the container, relative to its root.
    pub container_path: PathBuf,
}

impl FromStr for VolumeSpec {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [host, container] if !host.is_empty() && !container.is_empty() => {
                let container_path = PathBuf::from(container);
                if !stays_below_root(&container_path) {
                    return Err(CorralError::Config {
                        message: format!(
                            "volume target {container:?} must name a directory below the container root"
                        ),
                    });
                }
                Ok(Self {
                    host_path: PathBuf::from(host),
                    container_path,
                })
            }
            _ => Err(CorralError::Config {
                message: format!("volume must be hostPath:containerPath, got {s:?}"),
            }),
        }
    }
}

/// `true` when `path` has at least one normal component and no `..`.
fn stays_below_root(path: &Path) -> bool {
    let mut named = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => named = true,
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => return false,
        }
    }
    named
}

impl fmt::Display for VolumeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            self.host_path.display(),
            self.container_path.display()
        )
    }
}

/// A `hostPort:containerPort` TCP forwarding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    /// Port on the host.
    pub host_port: u16,
    /// Port inside the container.
    pub container_port: u16,
}

impl FromStr for PortMapping {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CorralError::Config {
            message: format!("port mapping must be hostPort:containerPort, got {s:?}"),
        };
        let (host, container) = s.split_once(':').ok_or_else(invalid)?;
        if container.contains(':') {
            return Err(invalid());
        }
        Ok(Self {
            host_port: host.trim().parse().map_err(|_| invalid())?,
            container_port: container.trim().parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host_port, self.container_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_short_and_distinct() {
        let a = ContainerId::generate();
        let b = ContainerId::generate();
        assert_eq!(a.as_str().len(), CONTAINER_ID_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_limits_are_dropped() {
        let limits = ResourceLimits::new(Some(String::new()), Some("512".into()), None);
        assert!(limits.memory_limit.is_none());
        assert_eq!(limits.cpu_share.as_deref(), Some("512"));
        assert!(!limits.is_empty());
        assert!(ResourceLimits::default().is_empty());
    }

    #[test]
    fn volume_spec_requires_two_non_empty_segments() {
        let spec: VolumeSpec = "/data:/srv".parse().expect("valid");
        assert_eq!(spec.host_path, PathBuf::from("/data"));
        assert_eq!(spec.container_path, PathBuf::from("/srv"));
        assert!("/data".parse::<VolumeSpec>().is_err());
        assert!(":/srv".parse::<VolumeSpec>().is_err());
        assert!("/a:/b:/c".parse::<VolumeSpec>().is_err());
    }

    #[test]
    fn volume_target_cannot_leave_the_container_root() {
        for raw in [
            "/tmp/x:/../../../../etc",
            "/tmp/x:/srv/../../etc",
            "/tmp/x:..",
            "/tmp/x:/",
            "/tmp/x:/./.",
        ] {
            let err = raw.parse::<VolumeSpec>().expect_err(raw);
            assert!(matches!(err, CorralError::Config { .. }), "{raw}");
        }
        let spec: VolumeSpec = "/tmp/x:./srv/data".parse().expect("relative");
        assert_eq!(spec.container_path, PathBuf::from("./srv/data"));
    }

    #[test]
    fn port_mapping_parses_host_and_container_ports() {
        let pm: PortMapping = "8080:80".parse().expect("valid");
        assert_eq!(pm.host_port, 8080);
        assert_eq!(pm.container_port, 80);
        assert!("8080".parse::<PortMapping>().is_err());
        assert!("a:80".parse::<PortMapping>().is_err());
        assert!("1:2:3".parse::<PortMapping>().is_err());
    }

    #[test]
    fn container_info_uses_camel_case_fields() {
        let info = ContainerInfo {
            pid: Some(42),
            id: ContainerId::new("abc"),
            name: "web".into(),
            command: "sh".into(),
            create_time: "2024-01-01 00:00:00".into(),
            status: ContainerStatus::Running,
            volume: String::new(),
            port_mapping: vec!["8080:80".into()],
            image: "busybox".into(),
            network: None,
            ip_address: None,
        };
        let json = serde_json::to_string(&info).expect("serialize");
        assert!(json.contains("\"createTime\""));
        assert!(json.contains("\"portMapping\""));
        assert!(json.contains("\"status\":\"running\""));
        assert!(!json.contains("ipAddress"));
        let back: ContainerInfo = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, info);
        assert_eq!(back.volume(), None);
    }
}
