//! `corral ps`: list containers.

use clap::Args;
use corral_common::config::RuntimeLayout;
use corral_common::types::ContainerStatus;

use crate::output::Table;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including stopped).
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the container records cannot be listed.
pub fn execute(args: &PsArgs, layout: RuntimeLayout) -> anyhow::Result<()> {
    let containers: Vec<_> = super::runtime(layout)
        .store()
        .list()?
        .into_iter()
        .filter(|c| args.all || c.status == ContainerStatus::Running)
        .collect();

    if containers.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    let mut table = Table::new(["ID", "NAME", "PID", "STATUS", "IMAGE", "IP", "COMMAND", "CREATED"]);
    for c in &containers {
        table.row([
            c.id.to_string(),
            c.name.clone(),
            c.pid.map_or_else(|| "-".to_owned(), |p| p.to_string()),
            c.status.to_string(),
            c.image.clone(),
            c.ip_address.clone().unwrap_or_else(|| "-".to_owned()),
            c.command.clone(),
            c.create_time.clone(),
        ]);
    }
    print!("{table}");
    Ok(())
}
