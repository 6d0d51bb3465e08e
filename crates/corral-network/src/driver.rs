//! Network drivers.
//!
//! [`NetworkDriver`] is the seam between the manager and the kernel
//! objects backing a network; [`DriverKind`] names the implementations and
//! dispatches to them. Only the Linux bridge driver exists today.

use std::fmt;
use std::str::FromStr;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use corral_common::error::{CorralError, Result};

use crate::endpoint::Endpoint;
use crate::firewall::{MasqueradeRule, RuleAction, run_iptables};
use crate::link;
use crate::network::Network;

/// Operations every network driver provides.
pub trait NetworkDriver {
    /// Driver name as stored in network records.
    fn name(&self) -> &'static str;

    /// Provisions network `name` whose gateway is `gateway` (address plus
    /// subnet prefix).
    ///
    /// # Errors
    ///
    /// Returns an error if the backing devices cannot be created.
    fn create(&self, gateway: Ipv4Network, name: &str) -> Result<Network>;

    /// Removes the devices backing `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if a device cannot be removed.
    fn delete(&self, network: &Network) -> Result<()>;

    /// Creates the host side of `endpoint` and attaches it to `network`.
    ///
    /// # Errors
    ///
    /// Returns an error if the devices cannot be created or attached.
    fn connect(&self, network: &Network, endpoint: &Endpoint) -> Result<()>;

    /// Removes the host side of `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if a device exists but cannot be removed.
    fn disconnect(&self, endpoint: &Endpoint) -> Result<()>;
}

/// Known driver implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Linux bridge with NAT.
    Bridge,
}

impl DriverKind {
    fn driver(self) -> &'static dyn NetworkDriver {
        match self {
            Self::Bridge => &BridgeDriver,
        }
    }
}

impl NetworkDriver for DriverKind {
    fn name(&self) -> &'static str {
        self.driver().name()
    }

    fn create(&self, gateway: Ipv4Network, name: &str) -> Result<Network> {
        self.driver().create(gateway, name)
    }

    fn delete(&self, network: &Network) -> Result<()> {
        self.driver().delete(network)
    }

    fn connect(&self, network: &Network, endpoint: &Endpoint) -> Result<()> {
        self.driver().connect(network, endpoint)
    }

    fn disconnect(&self, endpoint: &Endpoint) -> Result<()> {
        self.driver().disconnect(endpoint)
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DriverKind {
    type Err = CorralError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bridge" => Ok(Self::Bridge),
            other => Err(CorralError::NotFound {
                kind: "network driver",
                id: other.to_owned(),
            }),
        }
    }
}

/// Linux bridge driver: one bridge per network, named after it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeDriver;

impl NetworkDriver for BridgeDriver {
    fn name(&self) -> &'static str {
        "bridge"
    }

    fn create(&self, gateway: Ipv4Network, name: &str) -> Result<Network> {
        if link::link_exists(name) {
            return Err(CorralError::Conflict {
                kind: "bridge",
                id: name.to_owned(),
            });
        }
        let network = Network {
            name: name.to_owned(),
            ip_range: gateway,
            driver: DriverKind::Bridge,
        };

        link::create_bridge(name)?;
        let configured = link::set_interface_ip(name, gateway)
            .and_then(|()| link::set_up(name))
            .and_then(|()| run_iptables(&masquerade(&network).args(RuleAction::Append)));
        if let Err(e) = configured {
            if let Err(cleanup) = link::delete_link(name) {
                tracing::warn!(bridge = name, error = %cleanup, "half-created bridge left behind");
            }
            return Err(e);
        }

        tracing::info!(bridge = name, gateway = %gateway, "bridge created");
        Ok(network)
    }

    fn delete(&self, network: &Network) -> Result<()> {
        if let Err(e) = run_iptables(&masquerade(network).args(RuleAction::Delete)) {
            tracing::warn!(bridge = %network.name, error = %e, "masquerade rule not removed");
        }
        if link::link_exists(&network.name) {
            link::delete_link(&network.name)?;
        }
        tracing::info!(bridge = %network.name, "bridge deleted");
        Ok(())
    }

    fn connect(&self, network: &Network, endpoint: &Endpoint) -> Result<()> {
        let (host, peer) = (endpoint.device.host.as_str(), endpoint.device.peer.as_str());
        if link::link_exists(host) {
            return Err(CorralError::Conflict {
                kind: "interface",
                id: host.to_owned(),
            });
        }
        link::create_veth(host, peer)?;
        let attached = link::set_master(host, &network.name).and_then(|()| link::set_up(host));
        if let Err(e) = attached {
            if let Err(cleanup) = link::delete_link(host) {
                tracing::warn!(veth = host, error = %cleanup, "half-created veth left behind");
            }
            return Err(e);
        }
        tracing::debug!(veth = host, bridge = %network.name, "veth attached");
        Ok(())
    }

    fn disconnect(&self, endpoint: &Endpoint) -> Result<()> {
        let host = endpoint.device.host.as_str();
        if link::link_exists(host) {
            link::delete_link(host)?;
            tracing::debug!(veth = host, "veth removed");
        }
        Ok(())
    }
}

fn masquerade(network: &Network) -> MasqueradeRule {
    MasqueradeRule {
        subnet: network.subnet(),
        bridge: network.name.clone(),
    }
}
