//! Host resource sampling.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use sysinfo::{Disks, System};
use vigil_common::constants::BYTES_PER_MB;
use vigil_common::error::Result;
use vigil_runtime::stats::round1;

/// Total/used pair in megabytes with the used percentage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageStats {
    /// Capacity in MB.
    pub total: u64,
    /// Used amount in MB.
    pub used: u64,
    /// `used / total * 100`, one decimal.
    pub percent: f64,
}

impl UsageStats {
    /// Builds usage from byte counts.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn from_bytes(total: u64, used: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            round1(used as f64 / total as f64 * 100.0)
        };
        Self {
            total: total / BYTES_PER_MB,
            used: used / BYTES_PER_MB,
            percent,
        }
    }
}

/// One host sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostStats {
    /// Global CPU percent.
    pub cpu: f64,
    /// Physical memory.
    pub memory: UsageStats,
    /// Root filesystem.
    pub disk: UsageStats,
    /// GPU utilization percent; absent when no GPU is detected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu: Option<f64>,
}

const NVIDIA_SMI: &str = "nvidia-smi";
/// `nvidia-smi` arguments: utilization, memory used, memory total.
pub const GPU_QUERY: [&str; 2] = [
    "--query-gpu=utilization.gpu,memory.used,memory.total",
    "--format=csv,noheader,nounits",
];

/// Utilization percent from the first row of the [`GPU_QUERY`] output.
///
/// Rows that do not carry all three numeric columns are rejected, which
/// filters out `[N/A]` readings and driver error text.
#[must_use]
pub fn parse_gpu_utilization(output: &str) -> Option<f64> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let fields = line
        .split(',')
        .map(|f| f.trim().parse::<f64>().ok())
        .collect::<Option<Vec<_>>>()?;
    match fields.as_slice() {
        [utilization, _memory_used, _memory_total] => Some(*utilization),
        _ => None,
    }
}

/// Source of host samples.
#[async_trait]
pub trait HostSampler: Send + Sync {
    /// Takes one sample.
    ///
    /// # Errors
    ///
    /// Returns an error if the host cannot be sampled this cycle.
    async fn sample(&self) -> Result<HostStats>;
}

/// Sampler backed by `sysinfo`, with GPU data from `nvidia-smi`.
///
/// CPU usage is measured against the previous call, so the first sample
/// after construction reads low.
#[derive(Debug)]
pub struct SysinfoSampler {
    system: Mutex<System>,
    nvidia_smi: Option<PathBuf>,
    root: PathBuf,
}

impl SysinfoSampler {
    /// Creates a sampler, probing for `nvidia-smi` on `PATH`.
    #[must_use]
    pub fn new() -> Self {
        let nvidia_smi = which::which(NVIDIA_SMI).ok();
        match &nvidia_smi {
            Some(path) => tracing::info!(path = %path.display(), "GPU telemetry enabled"),
            None => tracing::debug!("nvidia-smi not found, GPU telemetry disabled"),
        }
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self {
            system: Mutex::new(system),
            nvidia_smi,
            root: PathBuf::from("/"),
        }
    }

    /// Returns `true` if GPU utilization will be reported.
    #[must_use]
    pub const fn has_gpu(&self) -> bool {
        self.nvidia_smi.is_some()
    }

    fn cpu_and_memory(&self) -> (f64, UsageStats) {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        system.refresh_memory();
        (
            round1(f64::from(system.global_cpu_usage())),
            UsageStats::from_bytes(system.total_memory(), system.used_memory()),
        )
    }

    /// Usage of the filesystem holding `/`. Hosts where it is not visible
    /// (some container overlays) report zeros.
    fn disk(&self) -> UsageStats {
        let disks = Disks::new_with_refreshed_list();
        let Some(disk) = disks
            .list()
            .iter()
            .filter(|d| self.root.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
        else {
            tracing::debug!(root = %self.root.display(), "root filesystem not listed");
            return UsageStats::default();
        };
        let total = disk.total_space();
        UsageStats::from_bytes(total, total.saturating_sub(disk.available_space()))
    }

    /// Queries GPU utilization; failures are logged and read as "no GPU".
    pub async fn gpu(&self) -> Option<f64> {
        let path = self.nvidia_smi.as_deref()?;
        query_gpu(path).await
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

async fn query_gpu(path: &Path) -> Option<f64> {
    let output = match tokio::process::Command::new(path).args(GPU_QUERY).output().await {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            tracing::warn!(status = %output.status, "nvidia-smi query failed");
            return None;
        }
        Err(e) => {
            tracing::warn!(error = %e, "nvidia-smi could not be run");
            return None;
        }
    };
    let reading = parse_gpu_utilization(&String::from_utf8_lossy(&output.stdout));
    if reading.is_none() {
        tracing::warn!("unparseable nvidia-smi output");
    }
    reading
}

#[async_trait]
impl HostSampler for SysinfoSampler {
    async fn sample(&self) -> Result<HostStats> {
        let (cpu, memory) = self.cpu_and_memory();
        let disk = self.disk();
        let gpu = self.gpu().await;
        Ok(HostStats {
            cpu,
            memory,
            disk,
            gpu,
        })
    }
}
