//! Container records.
//!
//! Each container keeps its metadata in `containers/<name>/config.json`.
//! There is no daemon: every command reads and rewrites these files
//! directly.

use std::path::Path;

use corral_common::config::RuntimeLayout;
use corral_common::error::{CorralError, Result};
use corral_common::types::{ContainerInfo, ContainerStatus};

/// Record store of one runtime root.
#[derive(Debug, Clone)]
pub struct ContainerStore {
    layout: RuntimeLayout,
}

impl ContainerStore {
    /// Opens the records under `layout`.
    #[must_use]
    pub const fn new(layout: RuntimeLayout) -> Self {
        Self { layout }
    }

    /// Writes `info`, replacing any record of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, info: &ContainerInfo) -> Result<()> {
        let dir = self.layout.container_dir(&info.name);
        std::fs::create_dir_all(&dir).map_err(|e| CorralError::io(&dir, e))?;
        let path = self.layout.config_file(&info.name);
        let json = serde_json::to_vec_pretty(info)?;
        std::fs::write(&path, json).map_err(|e| CorralError::io(&path, e))?;
        tracing::debug!(container = %info.name, path = %path.display(), "record saved");
        Ok(())
    }

    /// Reads the record of container `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if there is no such container.
    pub fn load(&self, name: &str) -> Result<ContainerInfo> {
        validate_name(name)?;
        read_record(&self.layout.config_file(name)).map_err(|e| {
            if e.is_not_found() {
                CorralError::NotFound {
                    kind: "container",
                    id: name.to_owned(),
                }
            } else {
                e
            }
        })
    }

    /// All readable records, oldest first. Unreadable records are skipped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the containers directory exists but cannot be
    /// listed.
    pub fn list(&self) -> Result<Vec<ContainerInfo>> {
        let dir = self.layout.containers_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CorralError::io(&dir, e)),
        };
        let mut records: Vec<ContainerInfo> = entries
            .flatten()
            .map(|entry| entry.path().join(corral_common::constants::CONFIG_FILE))
            .filter(|path| path.is_file())
            .filter_map(|path| match read_record(&path) {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping container record");
                    None
                }
            })
            .collect();
        records.sort_by(|a, b| {
            a.create_time
                .cmp(&b.create_time)
                .then_with(|| a.name.cmp(&b.name))
        });
        Ok(records)
    }

    /// Marks container `name` stopped and clears its pid.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or written.
    pub fn mark_stopped(&self, name: &str) -> Result<ContainerInfo> {
        let mut info = self.load(name)?;
        info.status = ContainerStatus::Stopped;
        info.pid = None;
        self.save(&info)?;
        Ok(info)
    }

    /// Deletes the record and log of container `name`, then its directory
    /// once empty. Nothing is removed recursively, so a workspace mount
    /// that is still attached keeps its contents. A missing container is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be removed or the directory still
    /// holds anything else.
    pub fn remove(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        remove_file(&self.layout.config_file(name))?;
        remove_file(&self.layout.log_file(name))?;
        let dir = self.layout.container_dir(name);
        match std::fs::remove_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(CorralError::io(dir, e)),
        }
        tracing::debug!(container = name, "record removed");
        Ok(())
    }
}

fn remove_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CorralError::io(path, e)),
    }
}

/// Container names become directory, cgroup and hostname components.
///
/// # Errors
///
/// Returns [`CorralError::Config`] unless `name` is 1-64 characters of
/// `[A-Za-z0-9_.-]` and does not start with `.` or `-`.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = (1..=64).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with(['.', '-']);
    if valid {
        Ok(())
    } else {
        Err(CorralError::Config {
            message: format!("invalid container name {name:?}"),
        })
    }
}

fn read_record(path: &Path) -> Result<ContainerInfo> {
    let bytes = std::fs::read(path).map_err(|e| CorralError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use corral_common::types::ContainerId;

    use super::*;

    fn record(name: &str, created: &str) -> ContainerInfo {
        ContainerInfo {
            pid: Some(4242),
            id: ContainerId::new(format!("{name}-id")),
            name: name.into(),
            command: "top".into(),
            create_time: created.into(),
            status: ContainerStatus::Running,
            volume: String::new(),
            port_mapping: vec!["8080:80".into()],
            image: "busybox".into(),
            network: None,
            ip_address: None,
        }
    }

    fn store() -> (tempfile::TempDir, ContainerStore) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let store = ContainerStore::new(RuntimeLayout::new(tmp.path()));
        (tmp, store)
    }

    #[test]
    fn saved_record_loads_back() {
        let (_tmp, store) = store();
        let info = record("web", "2024-01-01 10:00:00");
        store.save(&info).expect("save");
        assert_eq!(store.load("web").expect("load"), info);
    }

    #[test]
    fn record_uses_camel_case_fields() {
        let (tmp, store) = store();
        store.save(&record("web", "2024-01-01 10:00:00")).expect("save");
        let raw = std::fs::read_to_string(
            RuntimeLayout::new(tmp.path()).config_file("web"),
        )
        .expect("read");
        assert!(raw.contains("\"createTime\""));
        assert!(raw.contains("\"portMapping\""));
        assert!(raw.contains("\"status\": \"running\""));
    }

    #[test]
    fn missing_record_is_not_found() {
        let (_tmp, store) = store();
        let err = store.load("ghost").expect_err("missing");
        assert!(matches!(err, CorralError::NotFound { kind: "container", .. }));
    }

    #[test]
    fn mark_stopped_clears_pid() {
        let (_tmp, store) = store();
        store.save(&record("web", "2024-01-01 10:00:00")).expect("save");
        let info = store.mark_stopped("web").expect("stop");
        assert_eq!(info.status, ContainerStatus::Stopped);
        assert_eq!(info.pid, None);
        assert_eq!(store.load("web").expect("load"), info);
    }

    #[test]
    fn list_is_ordered_and_skips_garbage() {
        let (tmp, store) = store();
        store.save(&record("late", "2024-01-02 00:00:00")).expect("save");
        store.save(&record("early", "2024-01-01 00:00:00")).expect("save");
        let junk = RuntimeLayout::new(tmp.path()).config_file("junk");
        std::fs::create_dir_all(junk.parent().expect("parent")).expect("mkdir");
        std::fs::write(&junk, b"{ not json").expect("write");

        let names: Vec<_> = store
            .list()
            .expect("list")
            .into_iter()
            .map(|info| info.name)
            .collect();
        assert_eq!(names, vec!["early", "late"]);
    }

    #[test]
    fn list_without_containers_dir_is_empty() {
        let (_tmp, store) = store();
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let (tmp, store) = store();
        store.save(&record("web", "2024-01-01 10:00:00")).expect("save");
        store.remove("web").expect("remove");
        store.remove("web").expect("again");
        assert!(!RuntimeLayout::new(tmp.path()).container_dir("web").exists());
    }

    #[test]
    fn remove_never_descends_into_leftover_directories() {
        let (tmp, store) = store();
        let layout = RuntimeLayout::new(tmp.path());
        store.save(&record("web", "2024-01-01 10:00:00")).expect("save");
        std::fs::write(layout.log_file("web"), b"hello\n").expect("log");
        let kept = layout.merged_dir("web").join("precious");
        std::fs::create_dir_all(kept.parent().expect("parent")).expect("mkdir");
        std::fs::write(&kept, b"user data").expect("write");

        let err = store.remove("web").expect_err("directory not empty");
        assert!(matches!(err, CorralError::Io { .. }));
        assert!(kept.exists());
        assert!(!layout.config_file("web").exists());
        assert!(!layout.log_file("web").exists());
    }

    #[test]
    fn path_like_names_are_rejected() {
        for name in ["", "../etc", "a/b", ".hidden", "-x"] {
            assert!(validate_name(name).is_err(), "{name:?} accepted");
        }
        validate_name("web_1.v2").expect("valid");
    }
}
