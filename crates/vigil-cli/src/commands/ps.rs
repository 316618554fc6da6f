//! `vigil ps`: List containers with live metrics.

use clap::Args;
use vigil_common::config::VigilConfig;

use super::BackendArg;
use crate::output;

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    #[command(flatten)]
    pub backend: BackendArg,

    /// Only show running containers.
    #[arg(short, long)]
    pub running: bool,

    /// Print a table instead of JSON.
    #[arg(long)]
    pub table: bool,
}

/// Executes the `ps` command.
///
/// # Errors
///
/// Returns an error if the backends cannot be opened or the listing fails.
pub async fn execute(config: &VigilConfig, args: &PsArgs) -> anyhow::Result<()> {
    let dispatcher = super::connect(config).await?;
    let mut response = dispatcher.list(args.backend.selector()).await;
    if args.running {
        response.containers.retain(|c| c.status == "running");
    }

    if args.table {
        output::print_table(&response.containers);
    } else {
        output::print_json(&response)?;
    }
    match response.error {
        Some(error) => Err(anyhow::anyhow!("{error}")),
        None => Ok(()),
    }
}
