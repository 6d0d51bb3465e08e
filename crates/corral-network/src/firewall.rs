//! iptables NAT rules.
//!
//! Two rule kinds exist: one masquerade rule per bridge network, giving
//! containers outbound connectivity, and one DNAT rule per published port.
//! Every rule renders its arguments for either appending or deleting, so
//! teardown removes exactly what setup installed.

use std::net::Ipv4Addr;
use std::process::Command;

use ipnetwork::Ipv4Network;

use corral_common::error::{CorralError, Result};
use corral_common::types::PortMapping;

/// Whether a rule is installed or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// `-A`
    Append,
    /// `-D`
    Delete,
}

impl RuleAction {
    const fn flag(self) -> &'static str {
        match self {
            Self::Append => "-A",
            Self::Delete => "-D",
        }
    }
}

/// Source NAT for traffic leaving a bridge subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasqueradeRule {
    /// Subnet behind the bridge.
    pub subnet: Ipv4Network,
    /// Bridge interface; traffic staying on it is not rewritten.
    pub bridge: String,
}

impl MasqueradeRule {
    /// iptables arguments for `action`.
    #[must_use]
    pub fn args(&self, action: RuleAction) -> Vec<String> {
        [
            "-t",
            "nat",
            action.flag(),
            "POSTROUTING",
            "-s",
            &self.subnet.to_string(),
            "!",
            "-o",
            &self.bridge,
            "-j",
            "MASQUERADE",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
    }
}

/// TCP port forwarding from the host to a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnatRule {
    /// Port on the host.
    pub host_port: u16,
    /// Container address.
    pub container_ip: Ipv4Addr,
    /// Port inside the container.
    pub container_port: u16,
}

impl DnatRule {
    /// iptables arguments for `action`.
    #[must_use]
    pub fn args(&self, action: RuleAction) -> Vec<String> {
        [
            "-t",
            "nat",
            action.flag(),
            "PREROUTING",
            "-p",
            "tcp",
            "-m",
            "tcp",
            "--dport",
            &self.host_port.to_string(),
            "-j",
            "DNAT",
            "--to-destination",
            &format!("{}:{}", self.container_ip, self.container_port),
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
    }
}

/// Builds one DNAT rule per well-formed `host:container` mapping.
///
/// Malformed mappings are logged and skipped.
#[must_use]
pub fn port_forward_rules(container_ip: Ipv4Addr, mappings: &[String]) -> Vec<DnatRule> {
    mappings
        .iter()
        .filter_map(|raw| match raw.parse::<PortMapping>() {
            Ok(pm) => Some(DnatRule {
                host_port: pm.host_port,
                container_ip,
                container_port: pm.container_port,
            }),
            Err(e) => {
                tracing::error!(mapping = %raw, error = %e, "skipping port mapping");
                None
            }
        })
        .collect()
}

/// Runs one iptables command.
///
/// # Errors
///
/// Returns [`CorralError::Command`] if iptables cannot be run or rejects
/// the rule.
pub fn run_iptables(args: &[String]) -> Result<()> {
    let output = Command::new("iptables")
        .args(args)
        .output()
        .map_err(|e| CorralError::Command {
            program: "iptables",
            message: format!("cannot run iptables: {e}"),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CorralError::Command {
            program: "iptables",
            message: format!("iptables {} failed: {}", args.join(" "), stderr.trim()),
        });
    }
    tracing::debug!(rule = %args.join(" "), "iptables rule applied");
    Ok(())
}
