//! Domain primitive types used across the Vigil workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::VigilError;

/// Identifier of a container, unique within its backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random 12 character hex identifier.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(12);
        Self(id)
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The two interchangeable execution backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// The host container engine (Docker).
    #[default]
    Engine,
    /// The self-hosted mini runtime.
    Local,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Engine => write!(f, "docker"),
            Self::Local => write!(f, "mini-docker"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" | "engine" => Ok(Self::Engine),
            "mini" | "mini-docker" | "mini_docker" | "local" => Ok(Self::Local),
            other => Err(VigilError::BackendUnavailable {
                message: format!("unknown backend '{other}'"),
            }),
        }
    }
}

/// Lifecycle state of a self-hosted container.
///
/// Transitions only ever move forward: `Created -> Running -> Exited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalStatus {
    /// Root filesystem materialized, never started.
    Created,
    /// The runtime process is alive.
    Running,
    /// The runtime process is gone. Terminal.
    Exited,
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Unified view of a container returned by every backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Backend-scoped identifier.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// Image label.
    pub image: String,
    /// `created`/`running`/`exited` or the engine's native status string.
    pub status: String,
    /// Creation time in milliseconds since the Unix epoch.
    pub created: i64,
    /// CPU utilization percentage.
    pub cpu: f64,
    /// Resident memory in megabytes.
    pub memory: f64,
    /// `"hostPort:containerPort"` entries.
    pub ports: Vec<String>,
    /// Soft failure observed while computing metrics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Severity assigned to a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Lines mentioning ERROR, FATAL or EXCEPTION.
    Error,
    /// Lines mentioning WARN.
    Warn,
    /// Lines mentioning DEBUG.
    Debug,
    /// Everything else.
    Info,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "ERROR"),
            Self::Warn => write!(f, "WARN"),
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
        }
    }
}

/// A single classified log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp token taken from the line, or the time it was read.
    pub timestamp: String,
    /// Classified severity.
    #[serde(rename = "type")]
    pub level: LogLevel,
    /// Message prefixed with `[containerName]`.
    pub message: String,
}

/// A named volume on the container engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeRecord {
    /// Volume identifier (the engine uses the name).
    pub id: String,
    /// Volume name.
    pub name: String,
    /// Storage driver.
    pub driver: String,
    /// Host path backing the volume.
    pub mountpoint: String,
    /// Advisory size, `"Unknown"` when it cannot be computed.
    pub size: String,
    /// Creation timestamp as reported by the engine.
    pub created: String,
    /// Names of containers mounting this volume.
    pub used_by: Vec<String>,
    /// Soft failure observed while describing the volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
