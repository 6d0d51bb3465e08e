//! Network records.
//!
//! Each network is one JSON file named after the network in the network
//! directory.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use corral_common::error::{CorralError, Result};

use crate::driver::DriverKind;

/// Longest interface name the kernel accepts (`IFNAMSIZ - 1`).
pub const MAX_INTERFACE_NAME: usize = 15;

/// A named container network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Unique name; also the bridge interface name.
    pub name: String,
    /// Gateway address with the subnet's prefix length, e.g. `192.168.0.1/24`.
    pub ip_range: Ipv4Network,
    /// Driver that provisioned the network.
    pub driver: DriverKind,
}

impl Network {
    /// Address of the bridge, used as the containers' default route.
    #[must_use]
    pub fn gateway(&self) -> Ipv4Addr {
        self.ip_range.ip()
    }

    /// The subnet containers are allocated from.
    #[must_use]
    pub fn subnet(&self) -> Ipv4Network {
        Ipv4Network::new(self.ip_range.network(), self.ip_range.prefix()).unwrap_or(self.ip_range)
    }

    /// `ip` with this network's prefix length, as assigned to an interface.
    #[must_use]
    pub fn interface_address(&self, ip: Ipv4Addr) -> Ipv4Network {
        Ipv4Network::new(ip, self.ip_range.prefix()).unwrap_or(self.ip_range)
    }
}

/// Checks that `name` can serve as both a file name and an interface name.
///
/// # Errors
///
/// Returns [`CorralError::Config`] describing the violation.
pub fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_INTERFACE_NAME
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        && !name.starts_with('-');
    if valid {
        Ok(())
    } else {
        Err(CorralError::Config {
            message: format!(
                "network name {name:?} must be 1-{MAX_INTERFACE_NAME} characters of [A-Za-z0-9_-]"
            ),
        })
    }
}

/// Directory of network records.
#[derive(Debug, Clone)]
pub struct NetworkStore {
    dir: PathBuf,
}

impl NetworkStore {
    /// Opens the store at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Returns `true` if a record named `name` exists.
    #[must_use]
    pub fn exists(&self, name: &str) -> bool {
        self.record(name).is_file()
    }

    /// Writes `network`, replacing any record of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn save(&self, network: &Network) -> Result<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CorralError::io(&self.dir, e))?;
        let path = self.record(&network.name);
        let json = serde_json::to_vec_pretty(network)?;
        std::fs::write(&path, json).map_err(|e| CorralError::io(path, e))
    }

    /// Reads the record named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] if there is no such network.
    pub fn load(&self, name: &str) -> Result<Network> {
        validate_name(name)?;
        read_record(&self.record(name)).map_err(|e| {
            if e.is_not_found() {
                CorralError::NotFound {
                    kind: "network",
                    id: name.to_owned(),
                }
            } else {
                e
            }
        })
    }

    /// Deletes the record named `name`; a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove(&self, name: &str) -> Result<()> {
        let path = self.record(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CorralError::io(path, e)),
        }
    }

    /// All readable records, sorted by name. Unreadable files are skipped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be listed.
    pub fn list(&self) -> Result<Vec<Network>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CorralError::io(&self.dir, e)),
        };
        let mut networks: Vec<Network> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter_map(|entry| match read_record(&entry.path()) {
                Ok(network) => Some(network),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "skipping network record");
                    None
                }
            })
            .collect();
        networks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(networks)
    }
}

fn read_record(path: &Path) -> Result<Network> {
    let bytes = std::fs::read(path).map_err(|e| CorralError::io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}
