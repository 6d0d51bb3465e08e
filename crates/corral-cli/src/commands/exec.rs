//! `corral exec`: execute a command inside a running container.

use clap::Args;
use corral_common::config::RuntimeLayout;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Container name.
    pub container: String,

    /// Command to execute.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `exec` command and exits with the command's exit code.
///
/// # Errors
///
/// Returns an error if the container is not running or namespace joining fails.
pub fn execute(args: &ExecArgs, layout: RuntimeLayout) -> anyhow::Result<()> {
    let info = super::runtime(layout).store().load(&args.container)?;
    let code = corral_runtime::exec::exec_in_container(&info, &args.command)?;
    std::process::exit(code);
}
