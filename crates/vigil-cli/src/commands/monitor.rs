//! `vigil monitor`: Run the telemetry cycle and stream frames.
//!
//! Prints one JSON frame per cycle. With `--cycles N` it stops after `N`
//! cycles and prints the collected history; otherwise it runs until Ctrl+C.

use std::sync::Arc;

use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use vigil_common::config::VigilConfig;
use vigil_telemetry::aggregator::TelemetryAggregator;
use vigil_telemetry::host::SysinfoSampler;

use crate::output;

/// Arguments for the `monitor` command.
#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Stop after this many cycles.
    #[arg(long)]
    pub cycles: Option<u64>,
}

/// Executes the `monitor` command.
///
/// # Errors
///
/// Returns an error if the backends cannot be opened or output fails.
pub async fn execute(config: &VigilConfig, args: &MonitorArgs) -> anyhow::Result<()> {
    let dispatcher = super::connect(config).await?;
    let aggregator =
        TelemetryAggregator::new(config, Arc::new(SysinfoSampler::new()), dispatcher);

    let mut frames = aggregator.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match frames.recv().await {
                Ok(frame) => output::print_json(&frame)?,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "output fell behind, frames dropped");
                }
                Err(RecvError::Closed) => return anyhow::Ok(()),
            }
        }
    });

    tokio::select! {
        () = aggregator.run(args.cycles) => {}
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("interrupted, stopping telemetry");
        }
    }

    let history = aggregator.history();
    drop(aggregator);
    printer.await??;

    if args.cycles.is_some() {
        output::print_json(&history)?;
    }
    Ok(())
}
