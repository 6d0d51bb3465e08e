//! CLI command definitions and dispatch.

pub mod exec;
pub mod images;
pub mod init;
pub mod logs;
pub mod network;
pub mod ps;
pub mod rm;
pub mod run;
pub mod stop;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use corral_common::config::{CorralConfig, RuntimeLayout};
use corral_common::constants::{APP_NAME, DEFAULT_ROOT_DIR, ROOT_DIR_ENV};

/// corral: minimal daemon-less container runtime.
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Base directory for containers, images and network state.
    #[arg(long, global = true, env = ROOT_DIR_ENV, default_value = DEFAULT_ROOT_DIR)]
    pub root: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Format of the diagnostic log on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create and start a container.
    Run(run::RunArgs),
    /// Container entrypoint; started by `run`, never by hand.
    #[command(hide = true)]
    Init(init::InitArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Print the log of a detached container.
    Logs(logs::LogsArgs),
    /// Execute a command inside a running container.
    Exec(exec::ExecArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Remove a stopped container.
    Rm(rm::RmArgs),
    /// Manage container networks.
    Network(network::NetworkArgs),
    /// List images available to `run`.
    Images(images::ImagesArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let layout = CorralConfig::new(cli.root).layout();
    match cli.command {
        Command::Run(args) => run::execute(args, layout),
        Command::Init(args) => init::execute(&args),
        Command::Ps(args) => ps::execute(&args, layout),
        Command::Logs(args) => logs::execute(&args, &layout),
        Command::Exec(args) => exec::execute(&args, layout),
        Command::Stop(args) => stop::execute(&args, layout),
        Command::Rm(args) => rm::execute(&args, layout),
        Command::Network(args) => network::execute(args, &layout),
        Command::Images(args) => images::execute(&args, &layout),
    }
}

/// Opens the runtime over `layout`.
fn runtime(layout: RuntimeLayout) -> corral_runtime::ContainerRuntime {
    corral_runtime::ContainerRuntime::new(layout)
}
