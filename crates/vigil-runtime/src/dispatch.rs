//! Backend selection and response flattening.
//!
//! The dispatcher never returns an error: every outcome, including an
//! unknown selector or a backend this host cannot run, becomes one of the
//! response shapes below with `error` set.

use std::sync::Arc;

use serde::Serialize;
use vigil_common::config::VigilConfig;
use vigil_common::error::{Result, VigilError};
use vigil_common::types::{BackendKind, ContainerId, ContainerRecord, LogEntry, VolumeRecord};

use crate::backend::local::LocalSupervisor;
use crate::backend::{ContainerBackend, CreateRequest, docker};
use crate::process::SystemProbe;

/// Outcome of a lifecycle verb.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResponse {
    /// Whether the verb succeeded.
    pub success: bool,
    /// Updated record, when the backend reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<ContainerRecord>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionResponse {
    fn ok(container: Option<ContainerRecord>) -> Self {
        Self {
            success: true,
            container,
            error: None,
        }
    }

    fn failed(error: &VigilError) -> Self {
        Self {
            success: false,
            container: None,
            error: Some(error.to_string()),
        }
    }
}

/// Result of a container listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListResponse {
    /// Containers, empty on failure.
    pub containers: Vec<ContainerRecord>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a log query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogsResponse {
    /// Entries, oldest first.
    pub logs: Vec<LogEntry>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a volume listing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VolumesResponse {
    /// Volumes, empty on failure.
    pub volumes: Vec<VolumeRecord>,
    /// Failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn flatten<T, R>(
    result: Result<T>,
    ok: impl FnOnce(T) -> R,
    failed: impl FnOnce(String) -> R,
) -> R {
    match result {
        Ok(value) => ok(value),
        Err(e) => {
            tracing::warn!(error = %e, "request failed");
            failed(e.to_string())
        }
    }
}

fn action(result: Result<Option<ContainerRecord>>) -> ActionResponse {
    match result {
        Ok(container) => ActionResponse::ok(container),
        Err(e) => {
            tracing::warn!(error = %e, "lifecycle verb failed");
            ActionResponse::failed(&e)
        }
    }
}

/// Routes lifecycle verbs to the engine adapter or the mini runtime.
#[derive(Clone)]
pub struct Dispatcher {
    engine: Arc<dyn ContainerBackend>,
    local: Arc<dyn ContainerBackend>,
}

impl Dispatcher {
    /// Creates a dispatcher over two backends.
    #[must_use]
    pub fn new(engine: Arc<dyn ContainerBackend>, local: Arc<dyn ContainerBackend>) -> Self {
        Self { engine, local }
    }

    /// Connects to the local Docker daemon and opens the mini runtime
    /// supervisor under `config.data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the supervisor's state directory cannot be
    /// opened. An unreachable engine is not an error.
    pub async fn connect(config: &VigilConfig) -> Result<Self> {
        let engine = docker::connect().await;
        let local = LocalSupervisor::open(config.clone(), Arc::new(SystemProbe::new()))?;
        Ok(Self::new(Arc::new(engine), Arc::new(local)))
    }

    /// Returns the backend for `kind` regardless of availability.
    #[must_use]
    pub fn backend(&self, kind: BackendKind) -> &Arc<dyn ContainerBackend> {
        match kind {
            BackendKind::Engine => &self.engine,
            BackendKind::Local => &self.local,
        }
    }

    /// Resolves a selector; `None` means the engine.
    fn route(&self, selector: Option<&str>) -> Result<&dyn ContainerBackend> {
        let kind = selector.map_or(Ok(BackendKind::Engine), str::parse::<BackendKind>)?;
        let backend = self.backend(kind);
        if !backend.is_available() {
            return Err(VigilError::BackendUnavailable {
                message: format!("{kind} is not available on this host"),
            });
        }
        tracing::debug!(backend = %kind, "request routed");
        Ok(backend.as_ref())
    }

    /// Lists containers on the selected backend.
    pub async fn list(&self, selector: Option<&str>) -> ListResponse {
        let result = match self.route(selector) {
            Ok(backend) => backend.list().await,
            Err(e) => Err(e),
        };
        flatten(
            result,
            |containers| ListResponse {
                containers,
                error: None,
            },
            |error| ListResponse {
                containers: Vec::new(),
                error: Some(error),
            },
        )
    }

    /// Creates a container on the selected backend.
    pub async fn create(&self, selector: Option<&str>, request: &CreateRequest) -> ActionResponse {
        let result = match self.route(selector) {
            Ok(backend) => backend.create(request).await.map(Some),
            Err(e) => Err(e),
        };
        action(result)
    }

    /// Starts a container.
    pub async fn start(&self, selector: Option<&str>, id: &ContainerId) -> ActionResponse {
        let result = match self.route(selector) {
            Ok(backend) => backend.start(id).await,
            Err(e) => Err(e),
        };
        action(result)
    }

    /// Stops a container.
    pub async fn stop(&self, selector: Option<&str>, id: &ContainerId) -> ActionResponse {
        let result = match self.route(selector) {
            Ok(backend) => backend.stop(id).await,
            Err(e) => Err(e),
        };
        action(result)
    }

    /// Deletes a container.
    pub async fn delete(&self, selector: Option<&str>, id: &ContainerId) -> ActionResponse {
        let result = match self.route(selector) {
            Ok(backend) => backend.delete(id).await.map(|()| None),
            Err(e) => Err(e),
        };
        action(result)
    }

    /// Returns the last `tail` log entries of a container.
    pub async fn logs(
        &self,
        selector: Option<&str>,
        id: &ContainerId,
        tail: usize,
    ) -> LogsResponse {
        let result = match self.route(selector) {
            Ok(backend) => backend.logs(id, tail).await,
            Err(e) => Err(e),
        };
        flatten(
            result,
            |logs| LogsResponse { logs, error: None },
            |error| LogsResponse {
                logs: Vec::new(),
                error: Some(error),
            },
        )
    }

    /// Lists volumes on the selected backend.
    pub async fn volumes(&self, selector: Option<&str>) -> VolumesResponse {
        let result = match self.route(selector) {
            Ok(backend) => backend.list_volumes().await,
            Err(e) => Err(e),
        };
        flatten(
            result,
            |volumes| VolumesResponse {
                volumes,
                error: None,
            },
            |error| VolumesResponse {
                volumes: Vec::new(),
                error: Some(error),
            },
        )
    }

    /// Deletes a volume.
    pub async fn delete_volume(&self, selector: Option<&str>, id: &str) -> ActionResponse {
        let result = match self.route(selector) {
            Ok(backend) => backend.delete_volume(id).await.map(|()| None),
            Err(e) => Err(e),
        };
        action(result)
    }
}
