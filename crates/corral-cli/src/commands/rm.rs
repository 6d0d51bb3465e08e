//! `corral rm`: remove a stopped container and everything it owns.

use clap::Args;
use corral_common::config::RuntimeLayout;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container is unknown, still running, or part of
/// its teardown failed.
pub fn execute(args: &RmArgs, layout: RuntimeLayout) -> anyhow::Result<()> {
    super::runtime(layout).remove(&args.container)?;
    println!("{}", args.container);
    Ok(())
}
