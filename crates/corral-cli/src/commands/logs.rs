//! `corral logs`: print a detached container's log.

use clap::Args;
use corral_common::config::RuntimeLayout;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container name.
    pub container: String,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or its log unreadable.
pub fn execute(args: &LogsArgs, layout: &RuntimeLayout) -> anyhow::Result<()> {
    let _ = corral_runtime::ContainerStore::new(layout.clone()).load(&args.container)?;
    let logs = corral_runtime::logs::read_logs(layout, &args.container)?;

    if logs.is_empty() {
        println!("No logs available for container: {}", args.container);
    } else {
        print!("{logs}");
    }
    Ok(())
}
