//! Container endpoints on a network.
//!
//! Endpoints are not persisted. Everything needed to tear one down is
//! derived again from the container record: the id names the veth pair,
//! and the record keeps the address and port mappings.

use std::net::Ipv4Addr;

use sha2::{Digest, Sha256};

use crate::network::Network;

/// Hex characters of the endpoint digest used in interface names.
const VETH_ID_LEN: usize = 8;

/// The two ends of a veth pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// End attached to the bridge in the host namespace.
    pub host: String,
    /// End moved into the container namespace.
    pub peer: String,
}

impl VethPair {
    /// Derives stable, fixed-width names from an endpoint id.
    #[must_use]
    pub fn for_endpoint(endpoint_id: &str) -> Self {
        let digest = Sha256::digest(endpoint_id.as_bytes());
        let mut short: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        short.truncate(VETH_ID_LEN);
        Self {
            host: format!("veth{short}"),
            peer: format!("cif-{short}"),
        }
    }
}

/// A container's attachment to a network.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// `<container id>-<network name>`.
    pub id: String,
    /// Address allocated to the container.
    pub ip: Ipv4Addr,
    /// Network the endpoint belongs to.
    pub network: Network,
    /// veth pair wiring the container to the bridge.
    pub device: VethPair,
    /// Raw `host:container` port mappings.
    pub port_mapping: Vec<String>,
}

impl Endpoint {
    /// Builds the endpoint of `container_id` on `network`.
    #[must_use]
    pub fn new(container_id: &str, network: Network, ip: Ipv4Addr, port_mapping: Vec<String>) -> Self {
        let id = format!("{container_id}-{}", network.name);
        let device = VethPair::for_endpoint(&id);
        Self {
            id,
            ip,
            network,
            device,
            port_mapping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverKind;

    fn network() -> Network {
        Network {
            name: "testbr".into(),
            ip_range: "10.0.0.1/24".parse().expect("cidr"),
            driver: DriverKind::Bridge,
        }
    }

    #[test]
    fn veth_names_fit_ifnamsiz() {
        let pair = VethPair::for_endpoint("0123456789ab-testbr");
        assert_eq!(pair.host.len(), 12);
        assert_eq!(pair.peer.len(), 12);
        assert!(pair.host.starts_with("veth"));
        assert!(pair.peer.starts_with("cif-"));
        assert_eq!(pair.host[4..], pair.peer[4..]);
    }

    #[test]
    fn names_are_stable_and_distinguish_shared_prefixes() {
        let a = VethPair::for_endpoint("abcde11111-testbr");
        let b = VethPair::for_endpoint("abcde22222-testbr");
        assert_eq!(a, VethPair::for_endpoint("abcde11111-testbr"));
        assert_ne!(a.host, b.host);
    }

    #[test]
    fn endpoint_id_joins_container_and_network() {
        let ep = Endpoint::new("c0ffee", network(), Ipv4Addr::new(10, 0, 0, 2), vec![]);
        assert_eq!(ep.id, "c0ffee-testbr");
        assert_eq!(ep.device, VethPair::for_endpoint("c0ffee-testbr"));
    }
}
