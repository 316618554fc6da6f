//! Runtime process spawning, liveness, and termination.
//!
//! The mini runtime is an external executable invoked as
//! `runtime <rootfs> <entrypoint>`. The supervisor keeps its pid and start
//! time; liveness is judged by signalling the pid and asking the OS whether
//! it has become a zombie, and identity by comparing start times.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use vigil_common::error::{Result, VigilError};

/// One resource sample of a live process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    /// CPU usage since the previous sample, as a percent of one core.
    pub cpu_percent: f64,
    /// Resident set size in bytes.
    pub rss_bytes: u64,
    /// When the process started, seconds since the epoch.
    pub start_time: u64,
}

impl ProcessSample {
    /// Returns `true` if this process can be the one a record describes.
    ///
    /// A pid alone does not identify a process once the OS recycles it.
    /// With a recorded start time the two must agree to the second; without
    /// one, the process must at least not predate the record's creation.
    #[must_use]
    pub fn matches(&self, recorded_start: Option<u64>, created_ms: i64) -> bool {
        match recorded_start {
            Some(expected) => self.start_time.abs_diff(expected) <= START_TIME_SLACK_SECS,
            None => {
                let created = u64::try_from(created_ms).unwrap_or_default() / 1000;
                self.start_time.saturating_add(START_TIME_SLACK_SECS) >= created
            }
        }
    }
}

/// Start times are derived from boot time and clock ticks, so two reads
/// of the same process may differ by a rounding step.
const START_TIME_SLACK_SECS: u64 = 1;

/// OS process introspection used by the supervisor.
pub trait ProcessProbe: Send + Sync {
    /// Returns `true` if `pid` refers to a live, non-zombie process.
    fn is_alive(&self, pid: u32) -> bool;

    /// Samples CPU and RSS, or `None` if the process is not observable.
    fn sample(&self, pid: u32) -> Option<ProcessSample>;
}

/// Probe backed by `kill(pid, 0)` and `sysinfo`.
///
/// The `System` is kept between calls so per-process CPU usage is measured
/// against the previous sample.
#[derive(Debug)]
pub struct SystemProbe {
    system: Mutex<System>,
}

impl SystemProbe {
    /// Creates a probe with an empty process table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }

    fn refresh(&self, pid: u32) -> Option<ProcessSample> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        let pid = Pid::from_u32(pid);
        let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let process = system.process(pid)?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return None;
        }
        Some(ProcessSample {
            cpu_percent: f64::from(process.cpu_usage()),
            rss_bytes: process.memory(),
            start_time: process.start_time(),
        })
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        signal_alive(pid) && self.refresh(pid).is_some()
    }

    fn sample(&self, pid: u32) -> Option<ProcessSample> {
        if !signal_alive(pid) {
            return None;
        }
        self.refresh(pid)
    }
}

/// Checks existence with the null signal. `EPERM` still means it exists.
#[cfg(unix)]
pub fn signal_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid as NixPid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    matches!(kill(NixPid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

/// Stub for non-Unix platforms, where no runtime process can exist.
#[cfg(not(unix))]
pub const fn signal_alive(_pid: u32) -> bool {
    false
}

/// Termination signal escalation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// SIGTERM.
    Graceful,
    /// SIGKILL.
    Forceful,
}

/// Sends a termination signal. A process that is already gone is not an
/// error.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered for another reason.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: StopSignal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid as NixPid;

    let raw = i32::try_from(pid).map_err(|_| VigilError::Config {
        message: format!("pid {pid} out of range"),
    })?;
    let sig = match signal {
        StopSignal::Graceful => Signal::SIGTERM,
        StopSignal::Forceful => Signal::SIGKILL,
    };
    match kill(NixPid::from_raw(raw), sig) {
        Ok(()) | Err(Errno::ESRCH) => {
            tracing::info!(pid, signal = %sig, "signal sent");
            Ok(())
        }
        Err(e) => Err(VigilError::Io {
            path: format!("/proc/{pid}").into(),
            source: e.into(),
        }),
    }
}

/// Sends a termination signal.
///
/// # Errors
///
/// Always returns an error on non-Unix platforms.
#[cfg(not(unix))]
pub fn send_signal(_pid: u32, _signal: StopSignal) -> Result<()> {
    Err(VigilError::BackendUnavailable {
        message: "process signals require a Unix host".into(),
    })
}

/// How a process ended during [`terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited within the poll budget after SIGTERM.
    Graceful,
    /// Still alive after the poll budget; SIGKILL was sent.
    Forced,
}

/// Graceful-then-forceful termination with a bounded poll budget.
///
/// Sends SIGTERM, polls liveness up to `attempts` times `interval` apart,
/// then sends SIGKILL if the process is still alive. Signal delivery
/// failures are logged, never returned, so callers always converge.
pub async fn terminate(
    probe: &dyn ProcessProbe,
    pid: u32,
    attempts: u32,
    interval: Duration,
) -> Termination {
    if let Err(e) = send_signal(pid, StopSignal::Graceful) {
        tracing::warn!(pid, error = %e, "SIGTERM failed");
    }
    for _ in 0..attempts {
        if !probe.is_alive(pid) {
            return Termination::Graceful;
        }
        tokio::time::sleep(interval).await;
    }
    if !probe.is_alive(pid) {
        return Termination::Graceful;
    }
    if let Err(e) = send_signal(pid, StopSignal::Forceful) {
        tracing::warn!(pid, error = %e, "SIGKILL failed");
    }
    Termination::Forced
}

/// Launches `runtime <rootfs> <entrypoint>` with output appended to `log`.
///
/// The child is awaited on a background task so it never lingers as a
/// zombie once it exits. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the log cannot be opened or the executable cannot
/// be spawned.
pub fn spawn_runtime(runtime: &Path, rootfs: &Path, entrypoint: &str, log: &Path) -> Result<u32> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| VigilError::Io { path, source }
    };
    let stdout = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log)
        .map_err(io_err(log))?;
    let stderr = stdout.try_clone().map_err(io_err(log))?;

    let mut child = tokio::process::Command::new(runtime)
        .arg(rootfs)
        .arg(entrypoint)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .spawn()
        .map_err(io_err(runtime))?;

    let pid = child.id().ok_or_else(|| VigilError::Io {
        path: runtime.to_path_buf(),
        source: std::io::Error::other("runtime exited before its pid was read"),
    })?;
    tracing::info!(
        pid,
        runtime = %runtime.display(),
        rootfs = %rootfs.display(),
        "runtime spawned"
    );

    drop(tokio::spawn(async move {
        match child.wait().await {
            Ok(status) => tracing::debug!(pid, %status, "runtime process reaped"),
            Err(e) => tracing::warn!(pid, error = %e, "failed to reap runtime process"),
        }
    }));
    Ok(pid)
}
