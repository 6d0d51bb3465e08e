//! Network orchestration.
//!
//! [`NetworkManager`] owns the network records and the address allocator
//! for one runtime root and drives the driver, namespace and firewall steps
//! that attach a container to a network.

use std::net::Ipv4Addr;
use std::str::FromStr;

use ipnetwork::Ipv4Network;

use corral_common::config::RuntimeLayout;
use corral_common::error::{CorralError, Result};
use corral_common::types::ContainerInfo;
use corral_core::namespace::network::{netns_path, run_in_netns};

use crate::driver::{DriverKind, NetworkDriver};
use crate::endpoint::{Endpoint, VethPair};
use crate::firewall::{RuleAction, port_forward_rules, run_iptables};
use crate::ipam::Ipam;
use crate::link;
use crate::network::{Network, NetworkStore, validate_name};

/// Networks and addresses of one runtime root.
#[derive(Debug, Clone)]
pub struct NetworkManager {
    store: NetworkStore,
    ipam: Ipam,
}

impl NetworkManager {
    /// Creates a manager over the network state of `layout`.
    #[must_use]
    pub fn new(layout: &RuntimeLayout) -> Self {
        Self::with_parts(
            NetworkStore::new(layout.network_dir()),
            Ipam::new(layout.ipam_file()),
        )
    }

    /// Creates a manager from explicit parts.
    #[must_use]
    pub const fn with_parts(store: NetworkStore, ipam: Ipam) -> Self {
        Self { store, ipam }
    }

    /// Creates network `name` on `subnet`; its first address becomes the
    /// gateway.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::Conflict`] for a duplicate name,
    /// [`CorralError::Config`] for an invalid name or subnet, or the
    /// driver's error. Nothing is left allocated on failure.
    pub fn create_network(&self, driver: DriverKind, subnet: &str, name: &str) -> Result<Network> {
        validate_name(name)?;
        if self.store.exists(name) {
            return Err(CorralError::Conflict {
                kind: "network",
                id: name.to_owned(),
            });
        }
        let subnet = Ipv4Network::from_str(subnet).map_err(|e| CorralError::Config {
            message: format!("invalid subnet {subnet:?}: {e}"),
        })?;

        let gateway = self.ipam.allocate(subnet)?;
        let created = Ipv4Network::new(gateway, subnet.prefix())
            .map_err(|e| CorralError::Config {
                message: format!("invalid gateway {gateway}: {e}"),
            })
            .and_then(|ip_range| driver.create(ip_range, name));
        let network = match created {
            Ok(network) => network,
            Err(e) => {
                self.release_logged(subnet, gateway);
                return Err(e);
            }
        };

        if let Err(e) = self.store.save(&network) {
            if let Err(cleanup) = driver.delete(&network) {
                tracing::warn!(network = name, error = %cleanup, "bridge left behind");
            }
            self.release_logged(subnet, gateway);
            return Err(e);
        }
        tracing::info!(network = name, subnet = %network.subnet(), driver = %driver, "network created");
        Ok(network)
    }

    /// Removes network `name`: its devices, its gateway address and its record.
    ///
    /// All steps run; the first failure is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::NotFound`] for an unknown network, otherwise
    /// the first failing step.
    pub fn delete_network(&self, name: &str) -> Result<()> {
        let network = self.store.load(name)?;
        let mut first = None;
        let steps = [
            ("delete devices", network.driver.delete(&network)),
            (
                "release gateway",
                self.ipam.release(network.subnet(), network.gateway()),
            ),
            ("remove record", self.store.remove(name)),
        ];
        for (step, outcome) in steps {
            if let Err(e) = outcome {
                tracing::error!(network = name, step, error = %e, "network removal step failed");
                first.get_or_insert(e);
            }
        }
        if let Some(e) = first {
            return Err(e);
        }
        tracing::info!(network = name, "network removed");
        Ok(())
    }

    /// All networks, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the network directory cannot be read.
    pub fn list(&self) -> Result<Vec<Network>> {
        self.store.list()
    }

    /// Attaches the running container `info` to network `name`.
    ///
    /// Allocates an address, wires a veth pair from the bridge into the
    /// container's network namespace, configures address, loopback and
    /// default route there, and publishes the container's port mappings.
    /// Malformed or rejected port mappings are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the container has no pid, the network does not
    /// exist, the subnet is exhausted, or wiring fails. A failed wiring
    /// releases the address and removes the host-side device.
    pub fn connect(&self, name: &str, info: &ContainerInfo) -> Result<Endpoint> {
        let pid = info.pid.ok_or_else(|| CorralError::Config {
            message: format!("container {} has no running process", info.name),
        })?;
        let network = self.store.load(name)?;
        let ip = self.ipam.allocate(network.subnet())?;
        let endpoint = Endpoint::new(info.id.as_str(), network, ip, info.port_mapping.clone());

        if let Err(e) = attach(&endpoint, pid) {
            if let Err(cleanup) = endpoint.network.driver.disconnect(&endpoint) {
                tracing::warn!(endpoint = %endpoint.id, error = %cleanup, "veth left behind");
            }
            self.release_logged(endpoint.network.subnet(), ip);
            return Err(e);
        }

        for rule in port_forward_rules(ip, &endpoint.port_mapping) {
            if let Err(e) = run_iptables(&rule.args(RuleAction::Append)) {
                tracing::error!(host_port = rule.host_port, error = %e, "port mapping not installed");
            }
        }
        tracing::info!(endpoint = %endpoint.id, %ip, "container connected");
        Ok(endpoint)
    }

    /// Detaches container `info` from the network recorded in it.
    ///
    /// Removes its port forwarding rules, its host-side veth and returns its
    /// address. A container without a network is left alone; a network that
    /// no longer exists only skips the device and address steps.
    ///
    /// # Errors
    ///
    /// Returns the first device or address failure after all steps ran.
    pub fn disconnect(&self, info: &ContainerInfo) -> Result<()> {
        let Some(name) = info.network.as_deref() else {
            return Ok(());
        };
        let ip = info
            .ip_address
            .as_deref()
            .and_then(|raw| raw.parse::<Ipv4Addr>().ok());

        if let Some(ip) = ip {
            for rule in port_forward_rules(ip, &info.port_mapping) {
                if let Err(e) = run_iptables(&rule.args(RuleAction::Delete)) {
                    tracing::warn!(host_port = rule.host_port, error = %e, "port mapping not removed");
                }
            }
        }

        let network = match self.store.load(name) {
            Ok(network) => network,
            Err(e) if e.is_not_found() => {
                tracing::warn!(network = name, "network gone, only removing veth");
                let device = VethPair::for_endpoint(&format!("{}-{name}", info.id));
                if link::link_exists(&device.host) {
                    link::delete_link(&device.host)?;
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut first = None;
        let endpoint = Endpoint::new(
            info.id.as_str(),
            network,
            ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
            info.port_mapping.clone(),
        );
        if let Err(e) = endpoint.network.driver.disconnect(&endpoint) {
            tracing::error!(endpoint = %endpoint.id, error = %e, "veth not removed");
            first.get_or_insert(e);
        }
        if let Some(ip) = ip {
            if let Err(e) = self.ipam.release(endpoint.network.subnet(), ip) {
                tracing::error!(endpoint = %endpoint.id, error = %e, "address not released");
                first.get_or_insert(e);
            }
        }
        if let Some(e) = first {
            return Err(e);
        }
        tracing::info!(endpoint = %endpoint.id, "container disconnected");
        Ok(())
    }

    fn release_logged(&self, subnet: Ipv4Network, ip: Ipv4Addr) {
        if let Err(e) = self.ipam.release(subnet, ip) {
            tracing::warn!(%subnet, %ip, error = %e, "address not released");
        }
    }
}

/// Wires `endpoint` into the network namespace of `pid`.
fn attach(endpoint: &Endpoint, pid: i32) -> Result<()> {
    endpoint.network.driver.connect(&endpoint.network, endpoint)?;
    let netns = netns_path(pid);
    link::set_netns(&endpoint.device.peer, &netns)?;
    run_in_netns(&netns, || configure_container_side(endpoint))
}

/// Runs inside the container's network namespace.
fn configure_container_side(endpoint: &Endpoint) -> Result<()> {
    let peer = endpoint.device.peer.as_str();
    link::set_interface_ip(peer, endpoint.network.interface_address(endpoint.ip))?;
    link::set_up(peer)?;
    link::set_up("lo")?;
    link::add_default_route(endpoint.network.gateway(), peer)
}
