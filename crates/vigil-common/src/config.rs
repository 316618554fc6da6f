//! Global configuration model for Vigil.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, VigilError};

/// Root configuration shared by the runtime and telemetry crates.
///
/// Every field has a default, so a config file only needs to name the
/// values it overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    /// Base directory for self-hosted container state.
    pub data_dir: PathBuf,
    /// Path to the isolation runtime executable.
    pub runtime_path: PathBuf,
    /// Telemetry cycle period in milliseconds.
    pub poll_interval_ms: u64,
    /// Samples retained by the history buffer.
    pub history_capacity: usize,
    /// Liveness polls after SIGTERM before SIGKILL.
    pub stop_poll_attempts: u32,
    /// Delay between liveness polls, in milliseconds.
    pub stop_poll_interval_ms: u64,
    /// Default number of log lines returned.
    pub log_tail: usize,
}

impl VigilConfig {
    /// Creates a configuration rooted at `data_dir`, with the runtime
    /// executable expected under `<data_dir>/bin`.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            runtime_path: data_dir.join("bin").join(constants::RUNTIME_BIN),
            data_dir,
            ..Self::default()
        }
    }

    /// Loads a JSON config file, filling unspecified fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VigilError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Rejects values that would break the telemetry or stop guarantees.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::Config`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(VigilError::Config {
                message: "poll_interval_ms must be greater than zero".into(),
            });
        }
        if self.history_capacity == 0 {
            return Err(VigilError::Config {
                message: "history_capacity must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Directory holding per-container state.
    #[must_use]
    pub fn containers_dir(&self) -> PathBuf {
        self.data_dir.join(constants::CONTAINERS_DIR)
    }

    /// Telemetry cycle period.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Delay between liveness polls during `stop`.
    #[must_use]
    pub const fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }
}

impl Default for VigilConfig {
    fn default() -> Self {
        let data_dir = constants::data_dir().clone();
        Self {
            runtime_path: data_dir.join("bin").join(constants::RUNTIME_BIN),
            data_dir,
            poll_interval_ms: constants::POLL_INTERVAL_MS,
            history_capacity: constants::HISTORY_CAPACITY,
            stop_poll_attempts: constants::STOP_POLL_ATTEMPTS,
            stop_poll_interval_ms: constants::STOP_POLL_INTERVAL_MS,
            log_tail: constants::DEFAULT_LOG_TAIL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_cadence() {
        let config = VigilConfig::with_data_dir("/tmp/vigil");
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.history_capacity, 60);
        assert_eq!(config.stop_poll_attempts, 5);
        assert_eq!(config.stop_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.runtime_path, PathBuf::from("/tmp/vigil/bin/mini_docker"));
        assert_eq!(config.containers_dir(), PathBuf::from("/tmp/vigil/containers"));
    }

    #[test]
    fn load_fills_missing_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vigil.json");
        std::fs::write(&path, r#"{"history_capacity": 10, "data_dir": "/srv/vigil"}"#)
            .expect("write");

        let config = VigilConfig::load(&path).expect("load");
        assert_eq!(config.history_capacity, 10);
        assert_eq!(config.data_dir, PathBuf::from("/srv/vigil"));
        assert_eq!(config.log_tail, 100);
    }

    #[test]
    fn load_rejects_zero_interval() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vigil.json");
        std::fs::write(&path, r#"{"poll_interval_ms": 0}"#).expect("write");

        let err = VigilConfig::load(&path).unwrap_err();
        assert!(matches!(err, VigilError::Config { .. }));
    }
}
