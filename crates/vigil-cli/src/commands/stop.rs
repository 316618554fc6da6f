//! `vigil stop`: Stop a running container.
//!
//! The mini runtime sends SIGTERM, waits up to the configured poll budget,
//! then sends SIGKILL.

use clap::Args;
use vigil_common::config::VigilConfig;
use vigil_common::types::ContainerId;

use super::BackendArg;
use crate::output;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container ID.
    pub container: String,

    #[command(flatten)]
    pub backend: BackendArg,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container cannot be stopped.
pub async fn execute(config: &VigilConfig, args: &StopArgs) -> anyhow::Result<()> {
    tracing::info!(container = %args.container, "stopping container");
    let dispatcher = super::connect(config).await?;
    let id = ContainerId::new(&args.container);
    output::report(&dispatcher.stop(args.backend.selector(), &id).await)
}
