//! `vigil start`: Start a created container.

use clap::Args;
use vigil_common::config::VigilConfig;
use vigil_common::types::ContainerId;

use super::BackendArg;
use crate::output;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container ID.
    pub container: String,

    #[command(flatten)]
    pub backend: BackendArg,
}

/// Executes the `start` command.
///
/// # Errors
///
/// Returns an error if the container cannot be started.
pub async fn execute(config: &VigilConfig, args: &StartArgs) -> anyhow::Result<()> {
    let dispatcher = super::connect(config).await?;
    let id = ContainerId::new(&args.container);
    output::report(&dispatcher.start(args.backend.selector(), &id).await)
}
