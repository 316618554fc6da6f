//! Backend abstraction shared by the engine adapter and the mini runtime.

pub mod docker;
pub mod engine;
pub mod local;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use vigil_common::error::{Result, VigilError};
use vigil_common::types::{ContainerId, ContainerRecord, LogEntry, VolumeRecord};

/// Parameters for creating a container.
///
/// Fields a backend cannot honour are ignored by it: the mini runtime has
/// no port mapping or GPU support.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Image reference.
    pub image: String,
    /// Requested name; generated when absent.
    pub name: Option<String>,
    /// Container port (`"80/tcp"` or `"80"`) to host port.
    #[serde(default)]
    pub ports: BTreeMap<String, String>,
    /// Fractional CPU share, e.g. `0.5` for half a CPU.
    pub cpu_limit: Option<f64>,
    /// Memory limit in megabytes.
    pub memory_limit: Option<u64>,
    /// Request every available GPU.
    #[serde(default)]
    pub gpu: bool,
}

impl CreateRequest {
    /// Creates a request for `image` with no other options.
    #[must_use]
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    /// Sets the container name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a port mapping.
    #[must_use]
    pub fn port(mut self, container_port: impl Into<String>, host_port: impl Into<String>) -> Self {
        let _ = self.ports.insert(container_port.into(), host_port.into());
        self
    }
}

/// Lifecycle contract implemented by both backends.
///
/// Every method reports failures as [`VigilError`]; none of them panic or
/// leave a container half-transitioned.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Returns whether this backend can serve requests on this host.
    fn is_available(&self) -> bool;

    /// Lists every container with fresh metrics.
    ///
    /// # Errors
    ///
    /// Returns an error only if the backend as a whole cannot be queried;
    /// per-container failures are folded into the records.
    async fn list(&self) -> Result<Vec<ContainerRecord>>;

    /// Creates a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be created.
    async fn create(&self, request: &CreateRequest) -> Result<ContainerRecord>;

    /// Starts a container, returning its updated record when the backend
    /// tracks one.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ids or invalid transitions.
    async fn start(&self, id: &ContainerId) -> Result<Option<ContainerRecord>>;

    /// Stops a container, returning its updated record when the backend
    /// tracks one.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ids or invalid transitions.
    async fn stop(&self, id: &ContainerId) -> Result<Option<ContainerRecord>>;

    /// Deletes a container, stopping it first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ids or if on-disk state cannot be removed.
    async fn delete(&self, id: &ContainerId) -> Result<()>;

    /// Returns the last `tail` classified log lines.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ids or unreadable logs.
    async fn logs(&self, id: &ContainerId, tail: usize) -> Result<Vec<LogEntry>>;

    /// Lists volumes. Backends without volumes report none.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        Ok(Vec::new())
    }

    /// Deletes a volume.
    ///
    /// # Errors
    ///
    /// Backends without volumes report every id as not found.
    async fn delete_volume(&self, id: &str) -> Result<()> {
        Err(VigilError::NotFound {
            kind: "volume",
            id: id.to_string(),
        })
    }
}
