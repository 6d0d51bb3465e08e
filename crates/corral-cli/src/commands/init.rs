//! `corral init`: entrypoint of a container's first process.

use clap::Args;

/// Arguments for the hidden `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Name of the container being started.
    pub name: String,
}

/// Executes the `init` command.
///
/// Never returns on success: the process becomes the user command.
///
/// # Errors
///
/// Returns an error if the command cannot be received or started.
pub fn execute(args: &InitArgs) -> anyhow::Result<()> {
    tracing::debug!(container = %args.name, "init process starting");
    match corral_runtime::run_init_process(&args.name)? {}
}
