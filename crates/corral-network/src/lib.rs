//! # corral-network
//!
//! Bridge networking for corral containers.
//!
//! - **IPAM**: bitmap address allocation per subnet, persisted as JSON.
//! - **Networks**: one JSON record per named network.
//! - **Drivers**: the Linux bridge driver with NAT.
//! - **Manager**: connecting a running container through a veth pair,
//!   configured from inside its network namespace, plus port forwarding.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod driver;
pub mod endpoint;
pub mod firewall;
pub mod ipam;
pub mod link;
pub mod manager;
pub mod network;

pub use driver::{DriverKind, NetworkDriver};
pub use endpoint::Endpoint;
pub use manager::NetworkManager;
pub use network::Network;
