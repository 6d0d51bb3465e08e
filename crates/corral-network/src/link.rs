//! Link configuration through iproute2.
//!
//! Commands run in the network namespace of the calling thread, so the
//! same helpers configure the host side and, from inside
//! [`corral_core::namespace::network::run_in_netns`], the container side.

use std::net::Ipv4Addr;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use ipnetwork::Ipv4Network;

use corral_common::error::{CorralError, Result};

/// Attempts made by [`set_interface_ip`] before giving up.
const SET_IP_ATTEMPTS: u32 = 2;
/// Pause between those attempts.
const SET_IP_BACKOFF: Duration = Duration::from_secs(2);

/// Returns `true` if an interface called `name` exists in the current namespace.
#[must_use]
pub fn link_exists(name: &str) -> bool {
    nix::net::if_::if_nametoindex(name).is_ok()
}

/// Creates a bridge device.
///
/// # Errors
///
/// Returns an error if `ip link add` fails.
pub fn create_bridge(name: &str) -> Result<()> {
    run_ip(&["link", "add", "name", name, "type", "bridge"])
}

/// Creates a veth pair `host` <-> `peer`.
///
/// # Errors
///
/// Returns an error if `ip link add` fails.
pub fn create_veth(host: &str, peer: &str) -> Result<()> {
    run_ip(&["link", "add", host, "type", "veth", "peer", "name", peer])
}

/// Deletes a link (a veth pair goes away with either end).
///
/// # Errors
///
/// Returns an error if `ip link del` fails.
pub fn delete_link(name: &str) -> Result<()> {
    run_ip(&["link", "del", name])
}

/// Brings a link up.
///
/// # Errors
///
/// Returns an error if `ip link set up` fails.
pub fn set_up(name: &str) -> Result<()> {
    run_ip(&["link", "set", name, "up"])
}

/// Enslaves `name` to `bridge`.
///
/// # Errors
///
/// Returns an error if `ip link set master` fails.
pub fn set_master(name: &str, bridge: &str) -> Result<()> {
    run_ip(&["link", "set", name, "master", bridge])
}

/// Moves `name` into the network namespace bound at `netns`.
///
/// # Errors
///
/// Returns an error if `ip link set netns` fails.
pub fn set_netns(name: &str, netns: &Path) -> Result<()> {
    let target = netns.to_string_lossy();
    run_ip(&["link", "set", name, "netns", &target])
}

/// Assigns `address` to `name`, waiting briefly for a link that has only
/// just been created or moved to appear.
///
/// # Errors
///
/// Returns an error if the link never appears or `ip addr add` fails.
pub fn set_interface_ip(name: &str, address: Ipv4Network) -> Result<()> {
    let cidr = address.to_string();
    let mut attempt = 1;
    loop {
        let outcome = if link_exists(name) {
            run_ip(&["addr", "add", &cidr, "dev", name])
        } else {
            Err(CorralError::NotFound {
                kind: "interface",
                id: name.to_owned(),
            })
        };
        match outcome {
            Ok(()) => return Ok(()),
            Err(e) if attempt < SET_IP_ATTEMPTS => {
                tracing::warn!(interface = name, attempt, error = %e, "retrying address assignment");
                std::thread::sleep(SET_IP_BACKOFF);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Installs the default route via `gateway` on `dev`.
///
/// # Errors
///
/// Returns an error if `ip route add` fails.
pub fn add_default_route(gateway: Ipv4Addr, dev: &str) -> Result<()> {
    let gw = gateway.to_string();
    run_ip(&["route", "add", "default", "via", &gw, "dev", dev])
}

/// Runs one `ip` command.
fn run_ip(args: &[&str]) -> Result<()> {
    let output = Command::new("ip").args(args).output().map_err(|e| CorralError::Command {
        program: "ip",
        message: format!("cannot run ip: {e}"),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CorralError::Command {
            program: "ip",
            message: format!("ip {} failed: {}", args.join(" "), stderr.trim()),
        });
    }
    tracing::trace!(args = %args.join(" "), "ip command succeeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_exists() {
        assert!(link_exists("lo"));
        assert!(!link_exists("corral-nope0"));
    }
}
