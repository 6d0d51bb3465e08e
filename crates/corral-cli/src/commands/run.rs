//! `corral run`: create and start a container.

use clap::Args;
use corral_common::config::RuntimeLayout;
use corral_common::types::ResourceLimits;
use corral_runtime::RunOptions;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach the container to this terminal and wait for it to exit.
    #[arg(long, conflicts_with = "detach")]
    pub ti: bool,

    /// Run in the background, logging to `container.log`.
    #[arg(short, long)]
    pub detach: bool,

    /// Bind mount, `hostPath:containerPath`.
    #[arg(short, long)]
    pub volume: Option<String>,

    /// Memory limit, e.g. `100m`.
    #[arg(short, long)]
    pub memory: Option<String>,

    /// CPU shares, e.g. `512`.
    #[arg(long)]
    pub cpushare: Option<String>,

    /// CPUs to run on, e.g. `0-1`.
    #[arg(long)]
    pub cpuset: Option<String>,

    /// Container name; defaults to the generated id.
    #[arg(long)]
    pub name: Option<String>,

    /// Environment entry `KEY=VALUE`, repeatable.
    #[arg(short, long = "env")]
    pub env: Vec<String>,

    /// Network to connect the container to.
    #[arg(long)]
    pub net: Option<String>,

    /// Port forward `hostPort:containerPort`, repeatable.
    #[arg(short = 'p', long = "publish")]
    pub publish: Vec<String>,

    /// Image name under `<root>/images`.
    pub image: String,

    /// Command to run inside the container.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// A detached run prints the container name. An interactive run exits
/// with the container's exit code.
///
/// # Errors
///
/// Returns an error if the container cannot be set up.
pub fn execute(args: RunArgs, layout: RuntimeLayout) -> anyhow::Result<()> {
    let options = RunOptions {
        interactive: args.ti,
        name: args.name,
        image: args.image,
        command: args.command,
        volume: args.volume,
        limits: ResourceLimits::new(args.memory, args.cpushare, args.cpuset),
        env: args.env,
        network: args.net,
        ports: args.publish,
    };
    let outcome = super::runtime(layout).run(&options)?;

    match outcome.exit_code {
        None => {
            println!("{}", outcome.info.name);
            Ok(())
        }
        Some(0) => Ok(()),
        Some(code) => std::process::exit(code),
    }
}
