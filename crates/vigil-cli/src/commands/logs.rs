//! `vigil logs`: Show classified container logs.

use clap::Args;
use vigil_common::config::VigilConfig;
use vigil_common::types::ContainerId;

use super::BackendArg;
use crate::output;

/// Arguments for the `logs` command.
#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Container ID.
    pub container: String,

    #[command(flatten)]
    pub backend: BackendArg,

    /// Number of most recent lines; defaults to the configured tail.
    #[arg(short = 'n', long)]
    pub tail: Option<usize>,
}

/// Executes the `logs` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or its logs are unreadable.
pub async fn execute(config: &VigilConfig, args: &LogsArgs) -> anyhow::Result<()> {
    let dispatcher = super::connect(config).await?;
    let id = ContainerId::new(&args.container);
    let tail = args.tail.unwrap_or(config.log_tail);
    let response = dispatcher.logs(args.backend.selector(), &id, tail).await;
    output::print_json(&response)?;
    match response.error {
        Some(error) => Err(anyhow::anyhow!("{error}")),
        None => Ok(()),
    }
}
