//! Self-hosted runtime supervisor.
//!
//! Drives the `created -> running -> exited` state machine on top of the
//! mini runtime executable. The registry is the in-memory source of truth;
//! every transition is persisted while the registry lock is held, so the
//! status/pid pair on disk never disagrees with what callers observed.
//! Stop polling runs without the lock.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use vigil_common::config::VigilConfig;
use vigil_common::constants::{ENTRYPOINT, LOCAL_NAME_PREFIX};
use vigil_common::error::{Result, VigilError};
use vigil_common::types::{ContainerId, ContainerRecord, LocalStatus, LogEntry};

use super::{ContainerBackend, CreateRequest};
use crate::logs;
use crate::process::{self, ProcessProbe, ProcessSample, StopSignal, Termination};
use crate::state::{ContainerMetadata, MetadataStore, Registry};
use crate::stats;

const INIT_SCRIPT: &str = "#!/bin/sh\necho \"Mini Docker container started\"\nsleep 3600\n";

/// Supervisor for containers run by the mini runtime.
pub struct LocalSupervisor {
    config: VigilConfig,
    store: MetadataStore,
    registry: Mutex<Registry>,
    probe: Arc<dyn ProcessProbe>,
}

impl LocalSupervisor {
    /// Opens the store under `config.data_dir` and reconciles every
    /// persisted record against the live process table before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the store directory cannot be created or listed.
    pub fn open(config: VigilConfig, probe: Arc<dyn ProcessProbe>) -> Result<Self> {
        let store = MetadataStore::open(config.containers_dir())?;
        let mut records = store.load_all()?;

        for metadata in &mut records {
            let mut changed = metadata.repair();
            if metadata.pid().is_some() && sample_runtime(probe.as_ref(), metadata).is_none() {
                tracing::info!(id = %metadata.id, "runtime process gone, marking exited");
                metadata.mark_exited();
                changed = true;
            }
            if changed {
                if let Err(e) = store.save(metadata) {
                    tracing::warn!(
                        id = %metadata.id,
                        error = %e,
                        "failed to persist reconciled record"
                    );
                }
            }
        }
        tracing::info!(
            count = records.len(),
            root = %store.root().display(),
            "supervisor state loaded"
        );

        Ok(Self {
            config,
            store,
            registry: Mutex::new(Registry::from_records(records)),
            probe,
        })
    }

    /// Path of the runtime executable.
    #[must_use]
    pub fn runtime_path(&self) -> &Path {
        &self.config.runtime_path
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn event(&self, id: &ContainerId, message: &str) {
        let path = logs::log_path(&self.store.container_dir(id));
        if let Err(e) = logs::append_event(&path, message) {
            tracing::warn!(id = %id, error = %e, "failed to append lifecycle event");
        }
    }

    /// Lays out `<container_dir>/rootfs/bin/init.sh`.
    fn prepare_rootfs(&self, id: &ContainerId) -> Result<()> {
        let bin = self.store.rootfs_dir(id).join("bin");
        std::fs::create_dir_all(&bin).map_err(|e| VigilError::Io {
            path: bin.clone(),
            source: e,
        })?;
        let script = bin.join("init.sh");
        std::fs::write(&script, INIT_SCRIPT).map_err(|e| VigilError::Io {
            path: script.clone(),
            source: e,
        })?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).map_err(
                |e| VigilError::Io {
                    path: script.clone(),
                    source: e,
                },
            )?;
        }
        Ok(())
    }

    /// Applies `change` to a copy of the record, persists it, then commits
    /// it to the registry. The registry is untouched if persisting fails.
    fn commit(
        &self,
        registry: &mut Registry,
        id: &ContainerId,
        change: impl FnOnce(&mut ContainerMetadata),
    ) -> Result<ContainerRecord> {
        let mut updated = registry.require_mut(id)?.clone();
        change(&mut updated);
        self.store.save(&updated)?;
        let record = updated.to_record();
        registry.insert(updated);
        Ok(record)
    }

    /// Resolves a stop once the runtime process is gone.
    ///
    /// `last_known` is the record as it was when the stop began. If a
    /// concurrent `list()` already reconciled it, or a concurrent `delete()`
    /// removed it, the stop still succeeds.
    fn settle_stop(
        &self,
        registry: &mut Registry,
        last_known: ContainerMetadata,
        pid: u32,
    ) -> Result<ContainerRecord> {
        let id = last_known.id.clone();
        let record = match registry.get(&id).map(ContainerMetadata::pid) {
            Some(current) if current == Some(pid) => {
                self.commit(registry, &id, ContainerMetadata::mark_exited)?
            }
            Some(_) => registry.require_mut(&id)?.to_record(),
            None => {
                tracing::debug!(id = %id, "container deleted while stopping");
                let mut gone = last_known;
                gone.mark_exited();
                return Ok(gone.to_record());
            }
        };
        self.event(&id, "container stopped");
        Ok(record)
    }
}

/// Samples the runtime process a record points at.
///
/// Returns `None` when the pid is gone or has been recycled for a process
/// that is not this container's runtime.
fn sample_runtime(
    probe: &dyn ProcessProbe,
    metadata: &ContainerMetadata,
) -> Option<ProcessSample> {
    let pid = metadata.pid()?;
    let sample = probe.sample(pid)?;
    if sample.matches(metadata.started_at(), metadata.created) {
        Some(sample)
    } else {
        tracing::warn!(id = %metadata.id, pid, "pid now belongs to another process");
        None
    }
}

fn default_name(id: &ContainerId) -> String {
    let short: String = id.as_str().chars().take(6).collect();
    format!("{LOCAL_NAME_PREFIX}{short}")
}

#[async_trait]
impl ContainerBackend for LocalSupervisor {
    fn is_available(&self) -> bool {
        cfg!(target_os = "linux") && which::which(&self.config.runtime_path).is_ok()
    }

    async fn list(&self) -> Result<Vec<ContainerRecord>> {
        let mut registry = self.registry();
        for (id, pid) in registry.running() {
            let Some(metadata) = registry.get_mut(&id) else {
                continue;
            };
            if let Some(sample) = sample_runtime(self.probe.as_ref(), metadata) {
                metadata.cpu = stats::round1(sample.cpu_percent);
                metadata.memory = stats::bytes_to_mb(sample.rss_bytes);
                continue;
            }
            tracing::info!(id = %id, pid, "runtime process gone, marking exited");
            metadata.mark_exited();
            if let Err(e) = self.store.save(metadata) {
                tracing::warn!(id = %id, error = %e, "failed to persist reconciled record");
            }
            self.event(&id, "container exited");
        }
        Ok(registry.records())
    }

    async fn create(&self, request: &CreateRequest) -> Result<ContainerRecord> {
        let id = ContainerId::generate();
        let name = request.name.clone().unwrap_or_else(|| default_name(&id));
        if !request.ports.is_empty() || request.gpu {
            tracing::debug!(id = %id, "mini runtime ignores port mappings and GPU requests");
        }

        let mut registry = self.registry();
        if registry.name_taken(&name) {
            return Err(VigilError::NameConflict { name });
        }

        let metadata = ContainerMetadata::new(
            id.clone(),
            name,
            request.image.clone(),
            request.cpu_limit,
            request.memory_limit,
        );
        let prepared = self
            .prepare_rootfs(&id)
            .and_then(|()| self.store.save(&metadata));
        if let Err(e) = prepared {
            if let Err(cleanup) = self.store.remove(&id) {
                tracing::warn!(id = %id, error = %cleanup, "partial container left behind");
            }
            return Err(e);
        }
        self.event(&id, "container created");
        tracing::info!(
            id = %id,
            name = %metadata.name,
            image = %metadata.image,
            "container created"
        );

        let record = metadata.to_record();
        registry.insert(metadata);
        Ok(record)
    }

    async fn start(&self, id: &ContainerId) -> Result<Option<ContainerRecord>> {
        let mut registry = self.registry();
        let metadata = registry.require_mut(id)?;
        match metadata.status() {
            LocalStatus::Running => {
                return Err(VigilError::InvalidTransition {
                    id: id.to_string(),
                    reason: "is already running",
                });
            }
            LocalStatus::Exited => {
                return Err(VigilError::InvalidTransition {
                    id: id.to_string(),
                    reason: "has exited and cannot be restarted",
                });
            }
            LocalStatus::Created => {}
        }

        let container_dir = self.store.container_dir(id);
        let pid = process::spawn_runtime(
            &self.config.runtime_path,
            &self.store.rootfs_dir(id),
            ENTRYPOINT,
            &logs::log_path(&container_dir),
        )?;

        let started_at = self.probe.sample(pid).map(|s| s.start_time);
        if started_at.is_none() {
            tracing::debug!(id = %id, pid, "runtime start time unreadable");
        }
        match self.commit(&mut registry, id, |m| m.mark_running(pid, started_at)) {
            Ok(record) => {
                self.event(id, &format!("container started (pid {pid})"));
                tracing::info!(id = %id, pid, "container started");
                Ok(Some(record))
            }
            Err(e) => {
                if let Err(kill) = process::send_signal(pid, StopSignal::Forceful) {
                    tracing::warn!(id = %id, pid, error = %kill, "unrecorded runtime not killed");
                }
                Err(e)
            }
        }
    }

    async fn stop(&self, id: &ContainerId) -> Result<Option<ContainerRecord>> {
        let (pid, last_known) = {
            let mut registry = self.registry();
            let metadata = registry.require_mut(id)?;
            if metadata.status() != LocalStatus::Running {
                return Err(VigilError::InvalidTransition {
                    id: id.to_string(),
                    reason: "is not running",
                });
            }
            // Never signal a pid that no longer belongs to this container.
            let owned = sample_runtime(self.probe.as_ref(), metadata).and(metadata.pid());
            match owned {
                Some(pid) => (pid, metadata.clone()),
                None => {
                    let record = self.commit(&mut registry, id, ContainerMetadata::mark_exited)?;
                    self.event(id, "container exited");
                    return Ok(Some(record));
                }
            }
        };

        let outcome = process::terminate(
            self.probe.as_ref(),
            pid,
            self.config.stop_poll_attempts,
            self.config.stop_poll_interval(),
        )
        .await;
        if outcome == Termination::Forced {
            tracing::warn!(id = %id, pid, "runtime ignored SIGTERM, killed");
        }

        let record = self.settle_stop(&mut self.registry(), last_known, pid)?;
        tracing::info!(id = %id, pid, "container stopped");
        Ok(Some(record))
    }

    async fn delete(&self, id: &ContainerId) -> Result<()> {
        let running = self
            .registry()
            .get(id)
            .ok_or_else(|| VigilError::container_not_found(id.as_str()))?
            .status()
            == LocalStatus::Running;
        if running {
            match self.stop(id).await {
                Ok(_) | Err(VigilError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        let mut registry = self.registry();
        if registry.get(id).is_none() {
            return Err(VigilError::container_not_found(id.as_str()));
        }
        self.store.remove(id)?;
        let _ = registry.remove(id);
        tracing::info!(id = %id, "container deleted");
        Ok(())
    }

    async fn logs(&self, id: &ContainerId, tail: usize) -> Result<Vec<LogEntry>> {
        let name = self
            .registry()
            .get(id)
            .map(|m| m.name.clone())
            .ok_or_else(|| VigilError::container_not_found(id.as_str()))?;
        let path = logs::log_path(&self.store.container_dir(id));
        let lines = logs::read_tail(&path, tail)?;
        Ok(logs::parse_lines(&name, &lines))
    }
}
