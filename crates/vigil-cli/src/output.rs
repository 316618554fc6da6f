//! Output helpers for CLI commands.
//!
//! Responses go to stdout as pretty JSON; `ps --table` prints the
//! human-readable listing.

#![allow(clippy::print_stdout)]

use serde::Serialize;
use vigil_common::types::ContainerRecord;
use vigil_runtime::dispatch::ActionResponse;

/// Prints any response as pretty JSON.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints a lifecycle response and turns a failed one into an error so the
/// process exits non-zero.
///
/// # Errors
///
/// Returns an error if the response reports failure or cannot be printed.
pub fn report(response: &ActionResponse) -> anyhow::Result<()> {
    print_json(response)?;
    match (&response.success, &response.error) {
        (true, _) => Ok(()),
        (false, Some(error)) => Err(anyhow::anyhow!("{error}")),
        (false, None) => Err(anyhow::anyhow!("request failed")),
    }
}

/// Renders containers as a fixed-width table.
#[must_use]
pub fn container_table(containers: &[ContainerRecord]) -> String {
    let mut out = format!(
        "{:<14} {:<20} {:<10} {:>7} {:>9} {:<24} {}\n",
        "CONTAINER ID", "NAME", "STATUS", "CPU %", "MEM (MB)", "IMAGE", "PORTS"
    );
    for c in containers {
        let id: String = c.id.as_str().chars().take(12).collect();
        out.push_str(&format!(
            "{:<14} {:<20} {:<10} {:>7.1} {:>9.1} {:<24} {}\n",
            id,
            c.name,
            c.status,
            c.cpu,
            c.memory,
            c.image,
            c.ports.join(", ")
        ));
    }
    out
}

/// Prints containers as a table.
pub fn print_table(containers: &[ContainerRecord]) {
    if containers.is_empty() {
        println!("No containers found.");
    } else {
        print!("{}", container_table(containers));
    }
}

#[cfg(test)]
mod tests {
    use vigil_common::types::ContainerId;

    use super::*;

    fn record() -> ContainerRecord {
        ContainerRecord {
            id: ContainerId::new("0123456789abcdef"),
            name: "web".into(),
            image: "nginx:1.25".into(),
            status: "running".into(),
            created: 0,
            cpu: 7.5,
            memory: 42.0,
            ports: vec!["8080:80".into(), "8443:443".into()],
            error: None,
        }
    }

    #[test]
    fn table_truncates_ids_and_joins_ports() {
        let table = container_table(&[record()]);
        let row = table.lines().nth(1).unwrap();
        assert!(row.starts_with("0123456789ab "));
        assert!(row.contains("7.5"));
        assert!(row.ends_with("8080:80, 8443:443"));
        assert!(table.lines().next().unwrap().starts_with("CONTAINER ID"));
    }

    #[test]
    fn failed_report_is_an_error() {
        let failed = ActionResponse {
            success: false,
            container: None,
            error: Some("container abc is not running".into()),
        };
        let err = report(&failed).unwrap_err();
        assert_eq!(err.to_string(), "container abc is not running");
    }
}
