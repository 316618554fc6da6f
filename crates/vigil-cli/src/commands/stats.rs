//! `vigil stats`: Print one host resource sample.

use std::time::Duration;

use clap::Args;
use vigil_telemetry::host::{HostSampler, SysinfoSampler};

use crate::output;

/// CPU usage is a delta, so the sampler needs two refreshes this far apart.
const CPU_SETTLE: Duration = Duration::from_millis(250);

/// Arguments for the `stats` command.
#[derive(Args, Debug)]
pub struct StatsArgs {}

/// Executes the `stats` command.
///
/// # Errors
///
/// Returns an error if the host cannot be sampled.
pub async fn execute(_args: &StatsArgs) -> anyhow::Result<()> {
    let sampler = SysinfoSampler::new();
    tokio::time::sleep(CPU_SETTLE).await;
    let stats = sampler.sample().await?;
    output::print_json(&stats)
}
