//! Runtime configuration and the on-disk layout derived from it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;

/// Root configuration for the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorralConfig {
    /// Base directory for all state and data.
    pub root_dir: PathBuf,
}

impl CorralConfig {
    /// Creates a configuration rooted at `root_dir`.
    #[must_use]
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    /// Returns the path layout for this configuration.
    #[must_use]
    pub fn layout(&self) -> RuntimeLayout {
        RuntimeLayout::new(&self.root_dir)
    }
}

impl Default for CorralConfig {
    fn default() -> Self {
        let root = std::env::var_os(constants::ROOT_DIR_ENV)
            .map_or_else(|| PathBuf::from(constants::DEFAULT_ROOT_DIR), PathBuf::from);
        Self { root_dir: root }
    }
}

/// Every path the runtime reads or writes, derived from one base directory.
///
/// ```text
/// <root>/containers/<name>/{config.json, container.log, lowerLayer/, upperLayer/, workLayer/, mnt/}
/// <root>/images/<image>.tar
/// <root>/network/network/<network>
/// <root>/network/ipam/subnet.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    root: PathBuf,
}

impl RuntimeLayout {
    /// Creates a layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Base directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one subdirectory per container.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.root.join(constants::CONTAINERS_DIR)
    }

    /// Directory of a single container.
    #[must_use]
    pub fn container_dir(&self, name: &str) -> PathBuf {
        self.containers_dir().join(name)
    }

    /// Metadata record of a container.
    #[must_use]
    pub fn config_file(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::CONFIG_FILE)
    }

    /// Log file of a detached container.
    #[must_use]
    pub fn log_file(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::CONTAINER_LOG_FILE)
    }

    /// Parent of the per-image lower layers of a container.
    #[must_use]
    pub fn lower_root(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::LOWER_LAYER_DIR)
    }

    /// Extracted image used as the overlay lower layer.
    #[must_use]
    pub fn lower_dir(&self, name: &str, image: &str) -> PathBuf {
        self.lower_root(name).join(image)
    }

    /// Writable overlay layer.
    #[must_use]
    pub fn upper_dir(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::UPPER_LAYER_DIR)
    }

    /// Overlay scratch directory.
    #[must_use]
    pub fn work_dir(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::WORK_LAYER_DIR)
    }

    /// Merged mount point the container switches its root into.
    #[must_use]
    pub fn merged_dir(&self, name: &str) -> PathBuf {
        self.container_dir(name).join(constants::MERGED_DIR)
    }

    /// Directory holding image tarballs.
    #[must_use]
    pub fn images_dir(&self) -> PathBuf {
        self.root.join(constants::IMAGES_DIR)
    }

    /// Directory holding one JSON record per network.
    #[must_use]
    pub fn network_dir(&self) -> PathBuf {
        self.root.join(constants::NETWORK_ROOT_DIR).join("network")
    }

    /// Directory holding IPAM state.
    #[must_use]
    pub fn ipam_dir(&self) -> PathBuf {
        self.root.join(constants::NETWORK_ROOT_DIR).join("ipam")
    }

    /// The IPAM bitmap table.
    #[must_use]
    pub fn ipam_file(&self) -> PathBuf {
        self.ipam_dir().join(constants::IPAM_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_documented_tree() {
        let layout = RuntimeLayout::new("/srv/corral");
        assert_eq!(
            layout.config_file("web"),
            Path::new("/srv/corral/containers/web/config.json")
        );
        assert_eq!(
            layout.lower_dir("web", "busybox"),
            Path::new("/srv/corral/containers/web/lowerLayer/busybox")
        );
        assert_eq!(
            layout.merged_dir("web"),
            Path::new("/srv/corral/containers/web/mnt")
        );
        assert_eq!(
            layout.ipam_file(),
            Path::new("/srv/corral/network/ipam/subnet.json")
        );
        assert_eq!(
            layout.network_dir(),
            Path::new("/srv/corral/network/network")
        );
    }

    #[test]
    fn config_layout_uses_root_dir() {
        let config = CorralConfig::new("/tmp/x");
        assert_eq!(config.layout().root(), Path::new("/tmp/x"));
    }
}
