//! CLI command definitions and dispatch.

pub mod create;
pub mod logs;
pub mod monitor;
pub mod ps;
pub mod rm;
pub mod start;
pub mod stats;
pub mod stop;
pub mod volumes;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vigil_common::config::VigilConfig;
use vigil_common::constants::RUNTIME_BIN;
use vigil_runtime::dispatch::Dispatcher;

/// Vigil: container lifecycle and telemetry for Docker and the mini runtime.
#[derive(Parser, Debug)]
#[command(name = vigil_common::constants::APP_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file loaded over the defaults.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Base directory for mini runtime state.
    #[arg(long, global = true, env = "VIGIL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Path to the mini runtime executable.
    #[arg(long, global = true, env = "VIGIL_RUNTIME")]
    pub runtime: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// Resolves the effective configuration.
    ///
    /// The config file (or the defaults) is loaded first; `--data-dir`
    /// then moves both the state directory and the default runtime path,
    /// and `--runtime` overrides the runtime path last.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded.
    pub fn resolve_config(&self) -> anyhow::Result<VigilConfig> {
        let mut config = match &self.config {
            Some(path) => VigilConfig::load(path)?,
            None => VigilConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir.clone_from(dir);
            config.runtime_path = dir.join("bin").join(RUNTIME_BIN);
        }
        if let Some(runtime) = &self.runtime {
            config.runtime_path.clone_from(runtime);
        }
        Ok(config)
    }
}

/// Backend selector shared by lifecycle commands.
#[derive(Args, Debug, Clone, Default)]
pub struct BackendArg {
    /// Backend to use: `docker` (default) or `mini`.
    #[arg(short, long)]
    pub backend: Option<String>,
}

impl BackendArg {
    /// Selector as passed to the dispatcher.
    pub fn selector(&self) -> Option<&str> {
        self.backend.as_deref()
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List containers with live metrics.
    Ps(ps::PsArgs),
    /// Create a container.
    Create(create::CreateArgs),
    /// Start a created container.
    Start(start::StartArgs),
    /// Stop a running container.
    Stop(stop::StopArgs),
    /// Delete a container, stopping it first if needed.
    Rm(rm::RmArgs),
    /// Show classified container logs.
    Logs(logs::LogsArgs),
    /// List or delete engine volumes.
    Volumes(volumes::VolumesArgs),
    /// Print one host resource sample.
    Stats(stats::StatsArgs),
    /// Run the telemetry cycle and stream frames.
    Monitor(monitor::MonitorArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if configuration is invalid, state cannot be opened,
/// or the command reports a failure.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve_config()?;
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        runtime = %config.runtime_path.display(),
        "configuration resolved"
    );

    match cli.command {
        Command::Ps(args) => ps::execute(&config, &args).await,
        Command::Create(args) => create::execute(&config, &args).await,
        Command::Start(args) => start::execute(&config, &args).await,
        Command::Stop(args) => stop::execute(&config, &args).await,
        Command::Rm(args) => rm::execute(&config, &args).await,
        Command::Logs(args) => logs::execute(&config, &args).await,
        Command::Volumes(args) => volumes::execute(&config, &args).await,
        Command::Stats(args) => stats::execute(&args).await,
        Command::Monitor(args) => monitor::execute(&config, &args).await,
    }
}

/// Opens both backends for a command.
///
/// # Errors
///
/// Returns an error if the mini runtime state directory cannot be opened.
pub async fn connect(config: &VigilConfig) -> anyhow::Result<Dispatcher> {
    Ok(Dispatcher::connect(config).await?)
}
