//! `vigil volumes`: List or delete engine volumes.

use clap::Args;
use vigil_common::config::VigilConfig;

use super::BackendArg;
use crate::output;

/// Arguments for the `volumes` command.
#[derive(Args, Debug)]
pub struct VolumesArgs {
    #[command(flatten)]
    pub backend: BackendArg,

    /// Delete the named volume instead of listing.
    #[arg(long, value_name = "VOLUME")]
    pub delete: Option<String>,
}

/// Executes the `volumes` command.
///
/// # Errors
///
/// Returns an error if the listing or deletion fails.
pub async fn execute(config: &VigilConfig, args: &VolumesArgs) -> anyhow::Result<()> {
    let dispatcher = super::connect(config).await?;
    let selector = args.backend.selector();

    if let Some(volume) = &args.delete {
        return output::report(&dispatcher.delete_volume(selector, volume).await);
    }

    let response = dispatcher.volumes(selector).await;
    output::print_json(&response)?;
    match response.error {
        Some(error) => Err(anyhow::anyhow!("{error}")),
        None => Ok(()),
    }
}
