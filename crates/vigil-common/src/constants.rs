//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Default base directory for Vigil data when `$HOME` is unusable.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/vigil";

/// Returns the data directory, preferring `$HOME/.vigil` and falling back
/// to `/var/lib/vigil`.
fn resolve_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
        let user_dir = PathBuf::from(home).join(".vigil");
        if std::fs::create_dir_all(&user_dir).is_ok() {
            return user_dir;
        }
    }
    PathBuf::from(SYSTEM_DATA_DIR)
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Directory holding one subdirectory per self-hosted container.
pub const CONTAINERS_DIR: &str = "containers";

/// File name of a container's persisted metadata document.
pub const METADATA_FILE: &str = "metadata.json";

/// File name of a container's combined log.
pub const LOG_FILE: &str = "container.log";

/// Entrypoint every self-hosted container is launched with.
pub const ENTRYPOINT: &str = "/bin/init.sh";

/// Default file name of the isolation runtime executable.
pub const RUNTIME_BIN: &str = "mini_docker";

/// Prefix for generated self-hosted container names.
pub const LOCAL_NAME_PREFIX: &str = "mini-";

/// Number of samples kept by the telemetry history.
pub const HISTORY_CAPACITY: usize = 60;

/// Telemetry cycle period in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 1000;

/// Liveness polls performed after SIGTERM before escalating to SIGKILL.
pub const STOP_POLL_ATTEMPTS: u32 = 5;

/// Delay between liveness polls during `stop`, in milliseconds.
pub const STOP_POLL_INTERVAL_MS: u64 = 500;

/// Number of log lines returned when the caller does not ask for a tail.
pub const DEFAULT_LOG_TAIL: usize = 100;

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "vigil";

/// Bytes per megabyte as used by every size conversion.
pub const BYTES_PER_MB: u64 = 1024 * 1024;
