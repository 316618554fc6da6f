//! Engine-backed lifecycle adapter.
//!
//! Translates lifecycle verbs into calls on an [`EngineClient`] and turns
//! what the engine reports into unified records. The client is a trait so
//! the translation logic can be exercised without a daemon; the production
//! implementation lives in [`super::docker`].

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use futures::future::join_all;
use vigil_common::error::{Result, VigilError};
use vigil_common::types::{ContainerId, ContainerRecord, LogEntry, VolumeRecord};

use super::{ContainerBackend, CreateRequest};
use crate::logs;
use crate::stats::{self, ContainerFacts, CounterSnapshot};

/// A container as listed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineContainer {
    /// Engine container id.
    pub id: String,
    /// Name without the engine's leading slash.
    pub name: String,
    /// Image reference as the engine displays it.
    pub image: String,
    /// Content identifier of the image.
    pub image_id: String,
    /// Native status string, e.g. `running` or `exited`.
    pub status: String,
    /// Mounts attached to the container.
    pub mounts: Vec<EngineMount>,
}

/// One mount of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineMount {
    /// Mount type, e.g. `volume` or `bind`.
    pub kind: String,
    /// Volume name for volume mounts.
    pub name: Option<String>,
}

/// Detailed view of a container from an inspect call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineInspect {
    /// Listing-level fields.
    pub container: EngineContainer,
    /// RFC 3339 creation timestamp.
    pub created: String,
    /// Container port to bound host ports.
    pub port_bindings: BTreeMap<String, Vec<String>>,
}

/// A volume as listed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineVolume {
    /// Volume name.
    pub name: String,
    /// Storage driver.
    pub driver: String,
    /// Host mountpoint.
    pub mountpoint: String,
    /// Creation timestamp.
    pub created_at: Option<String>,
    /// Size in bytes when the engine reports usage data.
    pub size_bytes: Option<u64>,
}

/// Engine-native container creation parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineCreateSpec {
    /// Image reference.
    pub image: String,
    /// Container name.
    pub name: Option<String>,
    /// Container port (`"80/tcp"`) to host port.
    pub port_bindings: BTreeMap<String, String>,
    /// CPU shares, 1024 per CPU.
    pub cpu_shares: Option<i64>,
    /// Memory limit in the engine's string form, e.g. `"512m"`.
    pub memory_limit: Option<String>,
    /// Request all GPUs.
    pub gpu: bool,
}

/// Operations the adapter needs from a container engine.
#[async_trait]
pub trait EngineClient: Send + Sync {
    /// Lists all containers, including stopped ones.
    async fn list_containers(&self) -> Result<Vec<EngineContainer>>;
    /// Inspects one container.
    async fn inspect(&self, id: &str) -> Result<EngineInspect>;
    /// Reads one stats sample (previous and current counters).
    async fn counters(&self, id: &str) -> Result<CounterSnapshot>;
    /// Returns the human-readable tags of an image.
    async fn image_tags(&self, image_id: &str) -> Result<Vec<String>>;
    /// Creates a container, returning its id.
    async fn create(&self, spec: &EngineCreateSpec) -> Result<String>;
    /// Starts a container.
    async fn start(&self, id: &str) -> Result<()>;
    /// Stops a container.
    async fn stop(&self, id: &str) -> Result<()>;
    /// Removes a container forcibly.
    async fn remove(&self, id: &str) -> Result<()>;
    /// Returns up to `tail` raw log lines with timestamps.
    async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>>;
    /// Lists volumes.
    async fn list_volumes(&self) -> Result<Vec<EngineVolume>>;
    /// Removes a volume.
    async fn remove_volume(&self, name: &str) -> Result<()>;
}

/// CPU shares for a fractional CPU request.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn cpu_shares(cpu_share: f64) -> i64 {
    (cpu_share * 1024.0).round() as i64
}

/// Memory limit string for a megabyte value.
#[must_use]
pub fn memory_limit_string(memory_mb: u64) -> String {
    format!("{memory_mb}m")
}

/// Formats a byte count into a human-readable string (e.g. "128.0 MiB").
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    const GIB: u64 = MIB * 1024;

    if bytes >= GIB {
        format!("{:.1} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}

fn qualify_port(port: &str) -> String {
    if port.contains('/') {
        port.to_string()
    } else {
        format!("{port}/tcp")
    }
}

fn created_millis(created: &str) -> Result<i64> {
    chrono::DateTime::parse_from_rfc3339(created)
        .map(|t| t.timestamp_millis())
        .map_err(|e| VigilError::TransientStatsFailure {
            message: format!("unparseable creation time '{created}': {e}"),
        })
}

/// Engine-backed implementation of [`ContainerBackend`].
pub struct EngineBackend<C> {
    client: Option<C>,
    reason: String,
}

impl<C: EngineClient> EngineBackend<C> {
    /// Wraps a connected client.
    pub const fn new(client: C) -> Self {
        Self {
            client: Some(client),
            reason: String::new(),
        }
    }

    /// An adapter whose engine could not be reached; every verb reports
    /// [`VigilError::BackendUnavailable`].
    #[must_use]
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            client: None,
            reason: reason.into(),
        }
    }

    fn client(&self) -> Result<&C> {
        self.client
            .as_ref()
            .ok_or_else(|| VigilError::BackendUnavailable {
                message: format!("container engine not available: {}", self.reason),
            })
    }

    /// Builds a full record for one container, or fails with the first
    /// error hit while gathering metadata and counters.
    ///
    /// A missing image only costs the record its tag: the label falls back
    /// to the content identifier.
    async fn describe(&self, client: &C, id: &str) -> Result<ContainerRecord> {
        let details = client.inspect(id).await?;
        let counters = client.counters(id).await?;
        let image_id = &details.container.image_id;
        let tags = client.image_tags(image_id).await.unwrap_or_else(|e| {
            tracing::debug!(id, image_id = %image_id, error = %e, "image tags unavailable");
            Vec::new()
        });
        let facts = ContainerFacts {
            id: ContainerId::new(details.container.id.clone()),
            name: details.container.name.clone(),
            image: stats::image_label(&tags, &details.container.image_id),
            status: details.container.status.clone(),
            created: created_millis(&details.created)?,
            ports: stats::format_ports(&details.port_bindings),
        };
        Ok(stats::normalize(facts, &counters))
    }

    /// Like [`describe`](Self::describe) but never fails.
    async fn describe_or_degrade(&self, client: &C, summary: &EngineContainer) -> ContainerRecord {
        match self.describe(client, &summary.id).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(id = %summary.id, error = %e, "stats unavailable, degrading record");
                stats::degraded(
                    ContainerId::new(summary.id.clone()),
                    summary.name.clone(),
                    summary.image.clone(),
                    summary.status.clone(),
                    &e,
                )
            }
        }
    }
}

#[async_trait]
impl<C: EngineClient> ContainerBackend for EngineBackend<C> {
    fn is_available(&self) -> bool {
        self.client.is_some()
    }

    async fn list(&self) -> Result<Vec<ContainerRecord>> {
        let client = self.client()?;
        let containers = client.list_containers().await?;
        let records = join_all(
            containers
                .iter()
                .map(|summary| self.describe_or_degrade(client, summary)),
        )
        .await;
        Ok(records)
    }

    async fn create(&self, request: &CreateRequest) -> Result<ContainerRecord> {
        let client = self.client()?;
        let spec = EngineCreateSpec {
            image: request.image.clone(),
            name: request.name.clone(),
            port_bindings: request
                .ports
                .iter()
                .map(|(container, host)| (qualify_port(container), host.clone()))
                .collect(),
            cpu_shares: request.cpu_limit.map(cpu_shares),
            memory_limit: request.memory_limit.map(memory_limit_string),
            gpu: request.gpu,
        };
        let id = client.create(&spec).await?;
        if let Err(e) = client.start(&id).await {
            // Leave no created-but-never-started container holding the name.
            if let Err(cleanup) = client.remove(&id).await {
                tracing::warn!(id = %id, error = %cleanup, "unstarted container left behind");
            }
            return Err(e);
        }
        tracing::info!(id = %id, image = %request.image, "engine container created");

        let details = client.inspect(&id).await?;
        Ok(self.describe_or_degrade(client, &details.container).await)
    }

    async fn start(&self, id: &ContainerId) -> Result<Option<ContainerRecord>> {
        self.client()?.start(id.as_str()).await?;
        tracing::info!(id = %id, "engine container started");
        Ok(None)
    }

    async fn stop(&self, id: &ContainerId) -> Result<Option<ContainerRecord>> {
        self.client()?.stop(id.as_str()).await?;
        tracing::info!(id = %id, "engine container stopped");
        Ok(None)
    }

    async fn delete(&self, id: &ContainerId) -> Result<()> {
        self.client()?.remove(id.as_str()).await?;
        tracing::info!(id = %id, "engine container removed");
        Ok(())
    }

    async fn logs(&self, id: &ContainerId, tail: usize) -> Result<Vec<LogEntry>> {
        let client = self.client()?;
        let details = client.inspect(id.as_str()).await?;
        let lines = client.logs(id.as_str(), tail).await?;
        Ok(logs::parse_lines(&details.container.name, &lines))
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeRecord>> {
        let client = self.client()?;
        let volumes = client.list_volumes().await?;
        let containers = client.list_containers().await?;

        let mut used_by: HashMap<&str, Vec<String>> = HashMap::new();
        for container in &containers {
            let volumes = container
                .mounts
                .iter()
                .filter(|m| m.kind == "volume")
                .filter_map(|m| m.name.as_deref());
            for name in volumes {
                used_by.entry(name).or_default().push(container.name.clone());
            }
        }

        Ok(volumes
            .iter()
            .map(|v| VolumeRecord {
                id: v.name.clone(),
                name: v.name.clone(),
                driver: v.driver.clone(),
                mountpoint: v.mountpoint.clone(),
                size: v.size_bytes.map_or_else(|| "Unknown".to_string(), format_bytes),
                created: v.created_at.clone().unwrap_or_else(|| "Unknown".to_string()),
                used_by: used_by.get(v.name.as_str()).cloned().unwrap_or_default(),
                error: None,
            })
            .collect())
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        self.client()?.remove_volume(id).await?;
        tracing::info!(volume = %id, "volume removed");
        Ok(())
    }
}
