//! Point-in-time resource metrics derived from raw counters.
//!
//! Everything here is a pure function of its inputs. The engine adapter
//! feeds it the previous/current counter pair the engine reports for one
//! stats read; the supervisor uses the rounding helpers for per-process
//! samples.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use vigil_common::constants::BYTES_PER_MB;
use vigil_common::types::{ContainerId, ContainerRecord};

/// Cumulative CPU counters at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuCounters {
    /// Total CPU time consumed by the container, in nanoseconds.
    pub cpu_usage: u64,
    /// Total CPU time of the host, in nanoseconds.
    pub system_cpu_usage: u64,
}

/// Two consecutive counter reads plus the current memory usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Counters from the earlier read.
    pub previous: CpuCounters,
    /// Counters from the later read.
    pub current: CpuCounters,
    /// Memory in use, in bytes.
    pub memory_usage: u64,
}

/// Identity and metadata of a container before metrics are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFacts {
    /// Backend-scoped identifier.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// Resolved image label.
    pub image: String,
    /// Backend-native status.
    pub status: String,
    /// Creation time, milliseconds since the epoch.
    pub created: i64,
    /// Formatted port entries.
    pub ports: Vec<String>,
}

/// Rounds to one decimal place.
#[must_use]
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// CPU utilization between two counter reads, as a percentage.
///
/// Returns `0.0` whenever either delta is not positive, which covers
/// counter resets and the very first read where `previous` is all zeros
/// on the system side.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn cpu_percent(previous: CpuCounters, current: CpuCounters) -> f64 {
    let cpu_delta = i128::from(current.cpu_usage) - i128::from(previous.cpu_usage);
    let system_delta =
        i128::from(current.system_cpu_usage) - i128::from(previous.system_cpu_usage);
    if system_delta <= 0 || cpu_delta <= 0 {
        return 0.0;
    }
    round1((cpu_delta as f64 / system_delta as f64) * 100.0)
}

/// Converts bytes to megabytes, rounded to one decimal.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn bytes_to_mb(bytes: u64) -> f64 {
    round1(bytes as f64 / BYTES_PER_MB as f64)
}

/// Formats engine port bindings as `"hostPort:containerPort"` entries.
///
/// Keys are container-side ports such as `"80/tcp"`; the protocol suffix
/// is dropped. Ports without any host binding produce no entry.
#[must_use]
pub fn format_ports(bindings: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    bindings
        .iter()
        .flat_map(|(container_port, host_ports)| {
            let port = container_port
                .split_once('/')
                .map_or(container_port.as_str(), |(port, _)| port);
            host_ports
                .iter()
                .map(move |host_port| format!("{host_port}:{port}"))
        })
        .collect()
}

/// Picks the first human-readable tag, falling back to the content id.
#[must_use]
pub fn image_label(tags: &[String], image_id: &str) -> String {
    tags.iter()
        .find(|tag| !tag.is_empty() && tag.as_str() != "<none>:<none>")
        .cloned()
        .unwrap_or_else(|| image_id.to_string())
}

/// Builds a full record from container facts and a counter snapshot.
#[must_use]
pub fn normalize(facts: ContainerFacts, counters: &CounterSnapshot) -> ContainerRecord {
    ContainerRecord {
        id: facts.id,
        name: facts.name,
        image: facts.image,
        status: facts.status,
        created: facts.created,
        cpu: cpu_percent(counters.previous, counters.current),
        memory: bytes_to_mb(counters.memory_usage),
        ports: facts.ports,
        error: None,
    }
}

/// Minimal-but-valid record used when metrics could not be computed.
#[must_use]
pub fn degraded(
    id: ContainerId,
    name: String,
    image: String,
    status: String,
    cause: &impl Display,
) -> ContainerRecord {
    ContainerRecord {
        id,
        name,
        image,
        status,
        created: 0,
        cpu: 0.0,
        memory: 0.0,
        ports: Vec::new(),
        error: Some(cause.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn counters(cpu: u64, system: u64) -> CpuCounters {
        CpuCounters {
            cpu_usage: cpu,
            system_cpu_usage: system,
        }
    }

    #[test]
    fn cpu_percent_from_deltas() {
        let pct = cpu_percent(counters(1_000, 10_000), counters(1_500, 12_000));
        assert!((pct - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cpu_percent_zero_when_system_delta_not_positive() {
        assert!(cpu_percent(counters(100, 5_000), counters(900, 5_000)).abs() < f64::EPSILON);
        assert!(cpu_percent(counters(100, 9_000), counters(900, 5_000)).abs() < f64::EPSILON);
    }

    #[test]
    fn cpu_percent_zero_when_cpu_counter_resets() {
        let pct = cpu_percent(counters(5_000, 1_000), counters(10, 2_000));
        assert!(pct.abs() < f64::EPSILON);
    }

    #[test]
    fn memory_rounds_to_one_decimal() {
        assert!((bytes_to_mb(1_572_864) - 1.5).abs() < f64::EPSILON);
        assert!((bytes_to_mb(1_100_000) - 1.0).abs() < f64::EPSILON);
        assert!(bytes_to_mb(0).abs() < f64::EPSILON);
    }

    #[test]
    fn ports_format_host_then_container() {
        let mut bindings = BTreeMap::new();
        let _ = bindings.insert("80/tcp".to_string(), vec!["8080".to_string()]);
        assert_eq!(format_ports(&bindings), vec!["8080:80"]);
    }

    #[test]
    fn unbound_ports_are_omitted_and_multi_bindings_expand() {
        let mut bindings = BTreeMap::new();
        let _ = bindings.insert("443/tcp".to_string(), vec!["8443".into(), "9443".into()]);
        let _ = bindings.insert("53/udp".to_string(), Vec::new());
        assert_eq!(format_ports(&bindings), vec!["8443:443", "9443:443"]);
    }

    #[test]
    fn image_label_prefers_tag() {
        let tags = vec!["nginx:1.25".to_string(), "nginx:latest".to_string()];
        assert_eq!(image_label(&tags, "sha256:abc"), "nginx:1.25");
        assert_eq!(image_label(&[], "sha256:abc"), "sha256:abc");
        assert_eq!(image_label(&["<none>:<none>".into()], "sha256:abc"), "sha256:abc");
    }

    #[test]
    fn normalize_attaches_metrics() {
        let facts = ContainerFacts {
            id: ContainerId::new("c1"),
            name: "web".into(),
            image: "nginx:latest".into(),
            status: "running".into(),
            created: 1_700_000_000_000,
            ports: vec!["8080:80".into()],
        };
        let snapshot = CounterSnapshot {
            previous: counters(0, 0),
            current: counters(200, 1_000),
            memory_usage: 64 * 1024 * 1024,
        };
        let record = normalize(facts, &snapshot);
        assert!((record.cpu - 20.0).abs() < f64::EPSILON);
        assert!((record.memory - 64.0).abs() < f64::EPSILON);
        assert_eq!(record.ports, vec!["8080:80"]);
        assert!(record.error.is_none());
    }

    #[test]
    fn degraded_record_zeroes_metrics() {
        let record = degraded(
            ContainerId::new("c2"),
            "db".into(),
            "postgres".into(),
            "running".into(),
            &"container vanished",
        );
        assert!(record.cpu.abs() < f64::EPSILON);
        assert!(record.memory.abs() < f64::EPSILON);
        assert!(record.ports.is_empty());
        assert_eq!(record.error.as_deref(), Some("container vanished"));
    }
}
