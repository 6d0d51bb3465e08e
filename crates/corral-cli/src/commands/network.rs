//! `corral network`: manage bridge networks.

use clap::{Args, Subcommand};
use corral_common::config::RuntimeLayout;
use corral_network::{DriverKind, NetworkManager};

use crate::output::Table;

/// Arguments for the `network` command.
#[derive(Args, Debug)]
pub struct NetworkArgs {
    /// Network operation.
    #[command(subcommand)]
    pub command: NetworkCommand,
}

/// Network operations.
#[derive(Subcommand, Debug)]
pub enum NetworkCommand {
    /// Create a network and its bridge.
    Create(CreateArgs),
    /// List networks.
    #[command(alias = "ls")]
    List,
    /// Remove a network and its bridge.
    #[command(alias = "rm")]
    Remove {
        /// Network name.
        name: String,
    },
}

/// Arguments for `network create`.
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Network driver.
    #[arg(long, default_value = "bridge")]
    pub driver: DriverKind,

    /// Subnet in CIDR notation, e.g. `192.168.10.0/24`.
    #[arg(long)]
    pub subnet: String,

    /// Network name, also used as the bridge name.
    pub name: String,
}

/// Executes the `network` command.
///
/// # Errors
///
/// Returns an error if the network operation fails.
pub fn execute(args: NetworkArgs, layout: &RuntimeLayout) -> anyhow::Result<()> {
    let manager = NetworkManager::new(layout);
    match args.command {
        NetworkCommand::Create(create) => {
            let network = manager.create_network(create.driver, &create.subnet, &create.name)?;
            println!("{}", network.name);
        }
        NetworkCommand::List => {
            let networks = manager.list()?;
            if networks.is_empty() {
                println!("No networks found.");
                return Ok(());
            }
            let mut table = Table::new(["NAME", "IP RANGE", "DRIVER"]);
            for nw in &networks {
                table.row([nw.name.clone(), nw.ip_range.to_string(), nw.driver.to_string()]);
            }
            print!("{table}");
        }
        NetworkCommand::Remove { name } => {
            manager.delete_network(&name)?;
            println!("{name}");
        }
    }
    Ok(())
}
