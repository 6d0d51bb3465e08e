//! `corral stop`: stop a running container.

use clap::Args;
use corral_common::config::RuntimeLayout;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or cannot be signalled.
pub fn execute(args: &StopArgs, layout: RuntimeLayout) -> anyhow::Result<()> {
    let info = super::runtime(layout).stop(&args.container)?;
    println!("{}", info.name);
    Ok(())
}
