//! [`EngineClient`] over the Docker Engine API.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, Stats, StatsOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{DeviceRequest, HostConfig, MountPoint, PortBinding};
use bollard::volume::{ListVolumesOptions, RemoveVolumeOptions};
use futures::StreamExt;
use vigil_common::error::{Result, VigilError};

use super::engine::{
    EngineBackend, EngineClient, EngineContainer, EngineCreateSpec, EngineInspect, EngineMount,
    EngineVolume,
};
use crate::stats::{CounterSnapshot, CpuCounters};

/// Engine adapter bound to the local Docker daemon.
pub type DockerBackend = EngineBackend<Docker>;

/// Connects to the local Docker daemon.
///
/// Never fails: an unreachable daemon yields an adapter that reports every
/// verb as unavailable.
pub async fn connect() -> DockerBackend {
    let docker = match Docker::connect_with_local_defaults() {
        Ok(docker) => docker,
        Err(e) => {
            tracing::warn!(error = %e, "docker client could not be configured");
            return EngineBackend::unavailable(e.to_string());
        }
    };
    match docker.ping().await {
        Ok(_) => {
            tracing::debug!("docker daemon reachable");
            EngineBackend::new(docker)
        }
        Err(e) => {
            tracing::warn!(error = %e, "docker daemon unreachable");
            EngineBackend::unavailable(e.to_string())
        }
    }
}

/// Maps an API error for the object `kind`/`id` onto the Vigil taxonomy.
///
/// Daemon responses keep their meaning; transport-level failures mean the
/// engine itself is gone.
fn api_error(kind: &'static str, id: &str) -> impl FnOnce(BollardError) -> VigilError {
    let id = id.to_string();
    move |e| match e {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => VigilError::NotFound { kind, id },
        BollardError::DockerResponseServerError { message, .. } => VigilError::Engine { message },
        other => VigilError::BackendUnavailable {
            message: other.to_string(),
        },
    }
}

/// Parses a memory limit string into bytes.
///
/// Accepts the engine's short suffixes (`512m`, `1g`) as well as
/// `KiB`/`MiB`/`GiB`/`KB`/`MB`/`GB`; a bare number is bytes.
fn parse_memory(s: &str) -> Option<u64> {
    let s = s.trim();
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("GiB") {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("GB") {
        (n, 1_000_000_000)
    } else if let Some(n) = s.strip_suffix("MiB") {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix("MB") {
        (n, 1_000_000)
    } else if let Some(n) = s.strip_suffix("KiB") {
        (n, 1024)
    } else if let Some(n) = s.strip_suffix("KB") {
        (n, 1000)
    } else if let Some(n) = s.strip_suffix(['g', 'G']) {
        (n, 1024 * 1024 * 1024)
    } else if let Some(n) = s.strip_suffix(['m', 'M']) {
        (n, 1024 * 1024)
    } else if let Some(n) = s.strip_suffix(['k', 'K']) {
        (n, 1024)
    } else {
        (s, 1)
    };
    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}

fn strip_slash(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

fn mounts(points: Option<Vec<MountPoint>>) -> Vec<EngineMount> {
    points
        .unwrap_or_default()
        .into_iter()
        .map(|m| EngineMount {
            kind: m.typ.map(|t| t.to_string()).unwrap_or_default(),
            name: m.name,
        })
        .collect()
}

fn host_config(spec: &EngineCreateSpec) -> Result<HostConfig> {
    let port_bindings = spec
        .port_bindings
        .iter()
        .map(|(container, host)| {
            (
                container.clone(),
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(host.clone()),
                }]),
            )
        })
        .collect::<HashMap<_, _>>();

    let memory = spec
        .memory_limit
        .as_deref()
        .map(|limit| {
            parse_memory(limit)
                .and_then(|bytes| i64::try_from(bytes).ok())
                .ok_or_else(|| VigilError::Config {
                    message: format!("invalid memory limit '{limit}'"),
                })
        })
        .transpose()?;

    let device_requests = spec.gpu.then(|| {
        vec![DeviceRequest {
            count: Some(-1),
            capabilities: Some(vec![vec!["gpu".to_string()]]),
            ..Default::default()
        }]
    });

    Ok(HostConfig {
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        cpu_shares: spec.cpu_shares,
        memory,
        device_requests,
        ..Default::default()
    })
}

fn counters(stats: &Stats) -> CounterSnapshot {
    CounterSnapshot {
        previous: CpuCounters {
            cpu_usage: stats.precpu_stats.cpu_usage.total_usage,
            system_cpu_usage: stats.precpu_stats.system_cpu_usage.unwrap_or_default(),
        },
        current: CpuCounters {
            cpu_usage: stats.cpu_stats.cpu_usage.total_usage,
            system_cpu_usage: stats.cpu_stats.system_cpu_usage.unwrap_or_default(),
        },
        memory_usage: stats.memory_stats.usage.unwrap_or_default(),
    }
}

#[async_trait]
impl EngineClient for Docker {
    async fn list_containers(&self) -> Result<Vec<EngineContainer>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };
        let summaries = Docker::list_containers(self, Some(options))
            .await
            .map_err(api_error("container", "*"))?;

        Ok(summaries
            .into_iter()
            .map(|c| EngineContainer {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .and_then(|names| names.first().map(|n| strip_slash(n)))
                    .unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                image_id: c.image_id.unwrap_or_default(),
                status: c.state.unwrap_or_default(),
                mounts: mounts(c.mounts),
            })
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<EngineInspect> {
        let info = self
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(api_error("container", id))?;

        let port_bindings: BTreeMap<String, Vec<String>> = info
            .host_config
            .and_then(|hc| hc.port_bindings)
            .unwrap_or_default()
            .into_iter()
            .map(|(port, bindings)| {
                let hosts = bindings
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|b| b.host_port)
                    .filter(|p| !p.is_empty())
                    .collect();
                (port, hosts)
            })
            .collect();

        Ok(EngineInspect {
            container: EngineContainer {
                id: info.id.unwrap_or_else(|| id.to_string()),
                name: info.name.as_deref().map(strip_slash).unwrap_or_default(),
                image: info.config.and_then(|c| c.image).unwrap_or_default(),
                image_id: info.image.unwrap_or_default(),
                status: info
                    .state
                    .and_then(|s| s.status)
                    .map(|s| s.to_string())
                    .unwrap_or_default(),
                mounts: mounts(info.mounts),
            },
            created: info.created.unwrap_or_default(),
            port_bindings,
        })
    }

    async fn counters(&self, id: &str) -> Result<CounterSnapshot> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = std::pin::pin!(self.stats(id, Some(options)));
        match stream.next().await {
            Some(Ok(stats)) => Ok(counters(&stats)),
            Some(Err(e)) => Err(api_error("container", id)(e)),
            None => Err(VigilError::TransientStatsFailure {
                message: format!("no stats sample for {id}"),
            }),
        }
    }

    async fn image_tags(&self, image_id: &str) -> Result<Vec<String>> {
        let image = self
            .inspect_image(image_id)
            .await
            .map_err(api_error("image", image_id))?;
        Ok(image.repo_tags.unwrap_or_default())
    }

    async fn create(&self, spec: &EngineCreateSpec) -> Result<String> {
        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            ..Default::default()
        });
        let exposed_ports = spec
            .port_bindings
            .keys()
            .map(|port| (port.clone(), HashMap::new()))
            .collect::<HashMap<_, _>>();
        let config = Config {
            image: Some(spec.image.clone()),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config(spec)?),
            ..Default::default()
        };

        let created = self
            .create_container(options, config)
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404, ..
                } => VigilError::ImageNotFound {
                    image: spec.image.clone(),
                },
                other => api_error("container", "*")(other),
            })?;
        for warning in &created.warnings {
            tracing::warn!(id = %created.id, %warning, "engine warning on create");
        }
        Ok(created.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(api_error("container", id))
    }

    async fn stop(&self, id: &str) -> Result<()> {
        self.stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(api_error("container", id))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        self.remove_container(id, Some(options))
            .await
            .map_err(api_error("container", id))
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<Vec<String>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: tail.to_string(),
            ..Default::default()
        };
        let mut stream = std::pin::pin!(Docker::logs(self, id, Some(options)));
        let mut lines = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(api_error("container", id))?;
            lines.extend(chunk.to_string().lines().map(str::to_string));
        }
        Ok(lines)
    }

    async fn list_volumes(&self) -> Result<Vec<EngineVolume>> {
        let response = Docker::list_volumes(self, None::<ListVolumesOptions<String>>)
            .await
            .map_err(api_error("volume", "*"))?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| EngineVolume {
                size_bytes: v.usage_data.and_then(|u| u64::try_from(u.size).ok()),
                name: v.name,
                driver: v.driver,
                mountpoint: v.mountpoint,
                created_at: v.created_at,
            })
            .collect())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        Docker::remove_volume(self, name, None::<RemoveVolumeOptions>)
            .await
            .map_err(api_error("volume", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_memory_engine_suffixes() {
        assert_eq!(parse_memory("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory("2g"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory("64k"), Some(64 * 1024));
    }

    #[test]
    fn parse_memory_long_suffixes() {
        assert_eq!(parse_memory("128MiB"), Some(128 * 1024 * 1024));
        assert_eq!(parse_memory("1GiB"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory("1048576"), Some(1_048_576));
    }

    #[test]
    fn parse_memory_invalid() {
        assert_eq!(parse_memory("abc"), None);
        assert_eq!(parse_memory("m"), None);
    }

    #[test]
    fn host_config_translates_request() {
        let mut spec = EngineCreateSpec {
            image: "nginx".into(),
            cpu_shares: Some(512),
            memory_limit: Some("256m".into()),
            gpu: true,
            ..EngineCreateSpec::default()
        };
        let _ = spec
            .port_bindings
            .insert("80/tcp".to_string(), "8080".to_string());

        let hc = host_config(&spec).unwrap();
        assert_eq!(hc.cpu_shares, Some(512));
        assert_eq!(hc.memory, Some(256 * 1024 * 1024));
        let gpu = &hc.device_requests.unwrap()[0];
        assert_eq!(gpu.count, Some(-1));
        assert_eq!(gpu.capabilities, Some(vec![vec!["gpu".to_string()]]));
        let binding = hc.port_bindings.unwrap()["80/tcp"].clone().unwrap();
        assert_eq!(binding[0].host_port.as_deref(), Some("8080"));
    }

    #[test]
    fn host_config_without_limits_is_empty() {
        let spec = EngineCreateSpec {
            image: "nginx".into(),
            ..EngineCreateSpec::default()
        };
        let hc = host_config(&spec).unwrap();
        assert!(hc.port_bindings.is_none());
        assert!(hc.memory.is_none());
        assert!(hc.device_requests.is_none());
    }

    #[test]
    fn host_config_rejects_bad_memory() {
        let spec = EngineCreateSpec {
            memory_limit: Some("lots".into()),
            ..EngineCreateSpec::default()
        };
        assert!(matches!(host_config(&spec), Err(VigilError::Config { .. })));
    }

    #[test]
    fn missing_objects_map_to_not_found() {
        let err = api_error("container", "abc")(BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container: abc".into(),
        });
        assert_eq!(err.to_string(), "container not found: abc");

        let err = api_error("container", "abc")(BollardError::DockerResponseServerError {
            status_code: 409,
            message: "conflict".into(),
        });
        assert!(matches!(err, VigilError::Engine { .. }));
    }
}
