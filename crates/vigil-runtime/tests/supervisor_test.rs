//! End-to-end tests for the self-hosted runtime supervisor.
//!
//! A small shell script stands in for the mini runtime executable, so these
//! tests spawn, signal, and reap real processes.

#![cfg(target_os = "linux")]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use vigil_common::config::VigilConfig;
use vigil_common::error::VigilError;
use vigil_common::types::{ContainerId, LocalStatus, LogLevel};
use vigil_runtime::backend::local::LocalSupervisor;
use vigil_runtime::backend::{ContainerBackend, CreateRequest};
use vigil_runtime::dispatch::Dispatcher;
use vigil_runtime::process::{SystemProbe, signal_alive};
use vigil_runtime::state::{ContainerMetadata, MetadataStore};

const SLEEPY_RUNTIME: &str = "#!/bin/sh\necho \"runtime up: $1 $2\"\nexec sleep 30\n";
const STUBBORN_RUNTIME: &str = "#!/bin/sh\ntrap '' TERM\nwhile :; do sleep 1; done\n";

fn install_runtime(dir: &Path, script: &str) -> VigilConfig {
    let mut config = VigilConfig::with_data_dir(dir);
    config.stop_poll_interval_ms = 100;
    let bin = config.runtime_path.parent().expect("runtime dir").to_path_buf();
    std::fs::create_dir_all(&bin).expect("create bin dir");
    std::fs::write(&config.runtime_path, script).expect("write runtime");
    std::fs::set_permissions(&config.runtime_path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod runtime");
    config
}

fn open(config: &VigilConfig) -> LocalSupervisor {
    LocalSupervisor::open(config.clone(), Arc::new(SystemProbe::new())).expect("open supervisor")
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[tokio::test]
async fn create_start_stop_walks_the_state_machine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = install_runtime(dir.path(), SLEEPY_RUNTIME);
    let sup = open(&config);
    assert!(sup.is_available());

    let created = sup.create(&CreateRequest::new("alpine")).await.expect("create");
    assert_eq!(created.status, "created");

    let started = sup.start(&created.id).await.expect("start").expect("record");
    assert_eq!(started.status, "running");
    let store = MetadataStore::open(config.containers_dir()).expect("store");
    let pid = store.load(&created.id).expect("load").pid().expect("pid while running");
    assert!(signal_alive(pid));

    let err = sup.start(&created.id).await.expect_err("second start");
    assert!(matches!(err, VigilError::InvalidTransition { .. }));
    assert_eq!(store.load(&created.id).expect("load").pid(), Some(pid));

    let stopped = sup.stop(&created.id).await.expect("stop").expect("record");
    assert_eq!(stopped.status, "exited");
    let on_disk = store.load(&created.id).expect("load");
    assert_eq!(on_disk.pid(), None);
    assert_eq!(on_disk.status().to_string(), "exited");
}

#[tokio::test]
async fn stop_escalates_when_sigterm_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = install_runtime(dir.path(), STUBBORN_RUNTIME);
    config.stop_poll_attempts = 3;
    config.stop_poll_interval_ms = 50;
    let sup = open(&config);

    let created = sup.create(&CreateRequest::new("alpine")).await.expect("create");
    let _ = sup.start(&created.id).await.expect("start");
    // Give the shell time to install its trap.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    let stopped = sup.stop(&created.id).await.expect("stop").expect("record");
    assert_eq!(stopped.status, "exited");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn runtime_output_reaches_logs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = install_runtime(dir.path(), SLEEPY_RUNTIME);
    let sup = open(&config);

    let created = sup
        .create(&CreateRequest::new("alpine").name("echo"))
        .await
        .expect("create");
    let _ = sup.start(&created.id).await.expect("start");
    tokio::time::sleep(Duration::from_millis(200)).await;
    let _ = sup.stop(&created.id).await.expect("stop");

    let entries = sup.logs(&created.id, 100).await.expect("logs");
    assert!(entries.iter().all(|e| e.message.starts_with("[echo] ")));
    assert!(entries.iter().all(|e| e.level == LogLevel::Info));
    assert!(entries.iter().any(|e| e.message.contains("runtime up:")));
    assert!(entries.iter().any(|e| e.message.contains("container stopped")));

    let tail = sup.logs(&created.id, 1).await.expect("logs");
    assert_eq!(tail.len(), 1);
}

// ── Reconciliation ───────────────────────────────────────────────────

#[tokio::test]
async fn restart_reconciles_vanished_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = install_runtime(dir.path(), SLEEPY_RUNTIME);

    let store = MetadataStore::open(config.containers_dir()).expect("store");
    let id = ContainerId::new("0123456789ab");
    let mut metadata =
        ContainerMetadata::new(id.clone(), "mini-012345".into(), "alpine".into(), None, None);
    metadata.mark_running(999_999_999, None);
    store.save(&metadata).expect("save");

    let sup = open(&config);
    let records = sup.list().await.expect("list");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, "exited");
    assert_eq!(store.load(&id).expect("load").pid(), None);
}

#[tokio::test]
async fn restart_reconciles_pid_taken_by_another_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = install_runtime(dir.path(), SLEEPY_RUNTIME);

    // pid 1 is alive but started long before this record existed.
    let store = MetadataStore::open(config.containers_dir()).expect("store");
    let id = ContainerId::new("fedcba987654");
    let mut metadata =
        ContainerMetadata::new(id.clone(), "mini-fedcba".into(), "alpine".into(), None, None);
    metadata.mark_running(1, None);
    store.save(&metadata).expect("save");
    assert!(signal_alive(1));

    let sup = open(&config);
    let records = sup.list().await.expect("list");
    assert_eq!(records[0].status, "exited");
    let on_disk = store.load(&id).expect("load");
    assert_eq!(on_disk.pid(), None);
    assert_eq!(on_disk.status(), LocalStatus::Exited);
}

#[tokio::test]
async fn started_runtime_records_its_start_time() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = install_runtime(dir.path(), SLEEPY_RUNTIME);
    let sup = open(&config);

    let created = sup.create(&CreateRequest::new("alpine")).await.expect("create");
    let _ = sup.start(&created.id).await.expect("start");
    let store = MetadataStore::open(config.containers_dir()).expect("store");
    assert!(store.load(&created.id).expect("load").started_at().is_some());

    let reopened = open(&config);
    assert_eq!(reopened.list().await.expect("list")[0].status, "running");
    reopened.delete(&created.id).await.expect("delete");
}

#[tokio::test]
async fn state_survives_supervisor_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = install_runtime(dir.path(), SLEEPY_RUNTIME);

    let created = {
        let sup = open(&config);
        let created = sup.create(&CreateRequest::new("alpine")).await.expect("create");
        let _ = sup.start(&created.id).await.expect("start");
        created
    };

    let sup = open(&config);
    let records = sup.list().await.expect("list");
    assert_eq!(records[0].id, created.id);
    assert_eq!(records[0].status, "running");
    sup.delete(&created.id).await.expect("delete");
}

// ── Deletion ─────────────────────────────────────────────────────────

#[tokio::test]
async fn delete_running_container_stops_and_removes_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = install_runtime(dir.path(), SLEEPY_RUNTIME);
    let sup = open(&config);

    let created = sup.create(&CreateRequest::new("alpine")).await.expect("create");
    let _ = sup.start(&created.id).await.expect("start");
    let container_dir = config.containers_dir().join(created.id.as_str());
    assert!(container_dir.exists());

    sup.delete(&created.id).await.expect("delete");
    assert!(!container_dir.exists());
    assert!(sup.list().await.expect("list").is_empty());
}

// ── Concurrency ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_during_stop_keeps_status_and_pid_in_step() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = install_runtime(dir.path(), SLEEPY_RUNTIME);
    config.stop_poll_interval_ms = 300;
    let sup = Arc::new(open(&config));

    let created = sup.create(&CreateRequest::new("alpine")).await.expect("create");
    let _ = sup.start(&created.id).await.expect("start");

    let stopping = Arc::new(AtomicBool::new(true));
    let watcher = {
        let sup = Arc::clone(&sup);
        let stopping = Arc::clone(&stopping);
        let id = created.id.clone();
        let store = MetadataStore::open(config.containers_dir()).expect("store");
        tokio::spawn(async move {
            loop {
                let done = !stopping.load(Ordering::SeqCst);
                let _ = sup.list().await.expect("list");
                let on_disk = store.load(&id).expect("load");
                assert_eq!(
                    on_disk.pid().is_some(),
                    on_disk.status() == LocalStatus::Running,
                    "status {:?} with pid {:?}",
                    on_disk.status(),
                    on_disk.pid()
                );
                if done {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let stopped = sup.stop(&created.id).await.expect("stop").expect("record");
    stopping.store(false, Ordering::SeqCst);
    watcher.await.expect("watcher");

    assert_eq!(stopped.status, "exited");
    let store = MetadataStore::open(config.containers_dir()).expect("store");
    let on_disk = store.load(&created.id).expect("load");
    assert_eq!(on_disk.status(), LocalStatus::Exited);
    assert_eq!(on_disk.pid(), None);
}

// ── Dispatch ─────────────────────────────────────────────────────────

#[tokio::test]
async fn dispatcher_routes_to_supervisor() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = install_runtime(dir.path(), SLEEPY_RUNTIME);
    let local = Arc::new(open(&config));
    let engine = Arc::new(
        vigil_runtime::backend::docker::DockerBackend::unavailable("not under test"),
    );
    let dispatcher = Dispatcher::new(engine, local);

    let created = dispatcher
        .create(Some("mini"), &CreateRequest::new("alpine"))
        .await;
    assert!(created.success);
    let id = created.container.expect("record").id;

    let listed = dispatcher.list(Some("mini-docker")).await;
    assert_eq!(listed.containers.len(), 1);

    let engine_list = dispatcher.list(None).await;
    assert!(engine_list.containers.is_empty());
    assert!(engine_list.error.is_some());

    assert!(dispatcher.delete(Some("local"), &id).await.success);
}
