//! `vigil rm`: Delete a container.

use clap::Args;
use vigil_common::config::VigilConfig;
use vigil_common::types::ContainerId;

use super::BackendArg;
use crate::output;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container ID.
    pub container: String,

    #[command(flatten)]
    pub backend: BackendArg,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the container cannot be deleted.
pub async fn execute(config: &VigilConfig, args: &RmArgs) -> anyhow::Result<()> {
    let dispatcher = super::connect(config).await?;
    let id = ContainerId::new(&args.container);
    output::report(&dispatcher.delete(args.backend.selector(), &id).await)
}
