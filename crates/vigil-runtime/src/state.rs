//! Persistent state for self-hosted containers.
//!
//! Each container owns a directory under `<data_dir>/containers/<id>/`
//! holding its `metadata.json`, its root filesystem, and its log. Records
//! are replaced atomically (temp file, fsync, rename) so a crash mid-write
//! leaves the previous version readable.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use vigil_common::constants::METADATA_FILE;
use vigil_common::error::{Result, VigilError};
use vigil_common::types::{ContainerId, ContainerRecord, LocalStatus};

/// Durable record of one self-hosted container.
///
/// `status` and `pid` are only changed through [`mark_running`] and
/// [`mark_exited`], which keep `pid.is_some() == (status == Running)`.
///
/// [`mark_running`]: ContainerMetadata::mark_running
/// [`mark_exited`]: ContainerMetadata::mark_exited
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Container identifier.
    pub id: ContainerId,
    /// Container name.
    pub name: String,
    /// Opaque image label.
    pub image: String,
    status: LocalStatus,
    /// Creation time, milliseconds since the epoch.
    pub created: i64,
    /// Last sampled CPU percentage.
    pub cpu: f64,
    /// Last sampled resident memory in MB.
    pub memory: f64,
    /// CPU cap requested at creation.
    pub cpu_limit: Option<f64>,
    /// Memory cap in MB requested at creation.
    pub memory_limit: Option<u64>,
    pid: Option<u32>,
    #[serde(default)]
    started_at: Option<u64>,
    /// Port entries (always empty for the mini runtime).
    #[serde(default)]
    pub ports: Vec<String>,
}

impl ContainerMetadata {
    /// Creates a record in the `created` state.
    #[must_use]
    pub fn new(
        id: ContainerId,
        name: String,
        image: String,
        cpu_limit: Option<f64>,
        memory_limit: Option<u64>,
    ) -> Self {
        Self {
            id,
            name,
            image,
            status: LocalStatus::Created,
            created: chrono::Utc::now().timestamp_millis(),
            cpu: 0.0,
            memory: 0.0,
            cpu_limit,
            memory_limit,
            pid: None,
            started_at: None,
            ports: Vec::new(),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn status(&self) -> LocalStatus {
        self.status
    }

    /// PID of the runtime process while running.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Start time of the runtime process, seconds since the epoch, when it
    /// could be read at launch.
    #[must_use]
    pub const fn started_at(&self) -> Option<u64> {
        self.started_at
    }

    /// Transitions to `running` with the given process id and start time.
    pub const fn mark_running(&mut self, pid: u32, started_at: Option<u64>) {
        self.status = LocalStatus::Running;
        self.pid = Some(pid);
        self.started_at = started_at;
    }

    /// Transitions to `exited`, clearing the process identity and live
    /// metrics.
    pub const fn mark_exited(&mut self) {
        self.status = LocalStatus::Exited;
        self.pid = None;
        self.started_at = None;
        self.cpu = 0.0;
        self.memory = 0.0;
    }

    /// Repairs a record whose status and pid disagree.
    ///
    /// Returns `true` if anything changed. Only hand-edited or foreign
    /// records can trip this.
    pub fn repair(&mut self) -> bool {
        match (self.status, self.pid) {
            (LocalStatus::Running, None) => {
                self.mark_exited();
                true
            }
            (LocalStatus::Created | LocalStatus::Exited, Some(_)) => {
                self.pid = None;
                self.started_at = None;
                true
            }
            _ => false,
        }
    }

    /// Unified view handed to callers.
    #[must_use]
    pub fn to_record(&self) -> ContainerRecord {
        ContainerRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            status: self.status.to_string(),
            created: self.created,
            cpu: self.cpu,
            memory: self.memory,
            ports: self.ports.clone(),
            error: None,
        }
    }
}

/// On-disk store of container directories and metadata documents.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    /// Opens (and creates if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| VigilError::Io {
            path: root.clone(),
            source: e,
        })?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory owned by one container.
    #[must_use]
    pub fn container_dir(&self, id: &ContainerId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Root filesystem of one container.
    #[must_use]
    pub fn rootfs_dir(&self, id: &ContainerId) -> PathBuf {
        self.container_dir(id).join("rootfs")
    }

    fn metadata_path(&self, id: &ContainerId) -> PathBuf {
        self.container_dir(id).join(METADATA_FILE)
    }

    /// Persists a record, replacing any previous version atomically.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::PersistenceFailure`] if any step of the
    /// write-then-rename sequence fails.
    pub fn save(&self, metadata: &ContainerMetadata) -> Result<()> {
        let path = self.metadata_path(&metadata.id);
        let tmp = path.with_extension("json.tmp");
        let persist_err = |source: std::io::Error| VigilError::PersistenceFailure {
            path: path.clone(),
            source,
        };

        let dir = self.container_dir(&metadata.id);
        std::fs::create_dir_all(&dir).map_err(persist_err)?;
        let body = serde_json::to_vec_pretty(metadata)?;
        let mut file = std::fs::File::create(&tmp).map_err(persist_err)?;
        file.write_all(&body).map_err(persist_err)?;
        file.sync_all().map_err(persist_err)?;
        std::fs::rename(&tmp, &path).map_err(persist_err)?;
        tracing::debug!(id = %metadata.id, status = %metadata.status, "metadata saved");
        Ok(())
    }

    /// Loads a single record.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is missing or malformed.
    pub fn load(&self, id: &ContainerId) -> Result<ContainerMetadata> {
        let path = self.metadata_path(id);
        let content = std::fs::read_to_string(&path).map_err(|e| VigilError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Loads every readable record in the store.
    ///
    /// Directories without a metadata document are ignored; unreadable
    /// documents are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns an error if the store root cannot be listed.
    pub fn load_all(&self) -> Result<Vec<ContainerMetadata>> {
        tracing::debug!(path = %self.root.display(), "loading container metadata");
        let entries = std::fs::read_dir(&self.root).map_err(|e| VigilError::Io {
            path: self.root.clone(),
            source: e,
        })?;

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let id = ContainerId::new(name);
            if !self.metadata_path(&id).exists() {
                continue;
            }
            match self.load(&id) {
                Ok(record) if record.id == id => records.push(record),
                Ok(record) => {
                    tracing::warn!(
                        dir = %id,
                        recorded = %record.id,
                        "metadata id mismatch, skipping"
                    );
                }
                Err(e) => tracing::warn!(id = %id, error = %e, "unreadable metadata, skipping"),
            }
        }
        Ok(records)
    }

    /// Deletes a container's directory and everything in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn remove(&self, id: &ContainerId) -> Result<()> {
        let dir = self.container_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VigilError::Io {
                path: dir,
                source: e,
            }),
        }
    }
}

/// In-memory index of self-hosted containers.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<ContainerId, ContainerMetadata>,
}

impl Registry {
    /// Builds a registry from loaded records.
    #[must_use]
    pub fn from_records(records: Vec<ContainerMetadata>) -> Self {
        Self {
            entries: records.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    /// Looks up a record.
    #[must_use]
    pub fn get(&self, id: &ContainerId) -> Option<&ContainerMetadata> {
        self.entries.get(id)
    }

    /// Looks up a record for mutation.
    pub fn get_mut(&mut self, id: &ContainerId) -> Option<&mut ContainerMetadata> {
        self.entries.get_mut(id)
    }

    /// Looks up a record, failing with `NotFound`.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::NotFound`] for an unknown id.
    pub fn require_mut(&mut self, id: &ContainerId) -> Result<&mut ContainerMetadata> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| VigilError::container_not_found(id.as_str()))
    }

    /// Returns `true` if a container already uses `name`.
    #[must_use]
    pub fn name_taken(&self, name: &str) -> bool {
        self.entries.values().any(|m| m.name == name)
    }

    /// Adds a record.
    pub fn insert(&mut self, metadata: ContainerMetadata) {
        let _ = self.entries.insert(metadata.id.clone(), metadata);
    }

    /// Removes a record.
    pub fn remove(&mut self, id: &ContainerId) -> Option<ContainerMetadata> {
        self.entries.remove(id)
    }

    /// Ids of running containers.
    #[must_use]
    pub fn running(&self) -> Vec<(ContainerId, u32)> {
        self.entries
            .values()
            .filter_map(|m| m.pid.map(|pid| (m.id.clone(), pid)))
            .collect()
    }

    /// All records ordered by creation time, then id.
    #[must_use]
    pub fn records(&self) -> Vec<ContainerRecord> {
        let mut all: Vec<&ContainerMetadata> = self.entries.values().collect();
        all.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));
        all.into_iter().map(ContainerMetadata::to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str) -> ContainerMetadata {
        ContainerMetadata::new(
            ContainerId::new(id),
            format!("mini-{id}"),
            "alpine".into(),
            Some(0.5),
            Some(256),
        )
    }

    #[test]
    fn new_record_is_created_without_pid() {
        let m = sample("a1");
        assert_eq!(m.status(), LocalStatus::Created);
        assert!(m.pid().is_none());
    }

    #[test]
    fn transitions_keep_pid_and_status_in_step() {
        let mut m = sample("a2");
        m.mark_running(4242, Some(1_700_000_000));
        assert_eq!(m.status(), LocalStatus::Running);
        assert_eq!(m.pid(), Some(4242));
        assert_eq!(m.started_at(), Some(1_700_000_000));
        m.mark_exited();
        assert_eq!(m.status(), LocalStatus::Exited);
        assert!(m.pid().is_none());
        assert!(m.started_at().is_none());
    }

    #[test]
    fn repair_clears_inconsistent_pairs() {
        let json = r#"{"id":"b1","name":"x","image":"i","status":"running","created":0,
            "cpu":0.0,"memory":0.0,"cpu_limit":null,"memory_limit":null,"pid":null}"#;
        let mut m: ContainerMetadata = serde_json::from_str(json).unwrap();
        assert!(m.repair());
        assert_eq!(m.status(), LocalStatus::Exited);
        assert!(!m.repair());
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MetadataStore::open(dir.path()).expect("open");
        let mut m = sample("c1");
        m.mark_running(99, Some(1_700_000_000));
        store.save(&m).expect("save");

        let loaded = store.load(&m.id).expect("load");
        assert_eq!(loaded, m);
        assert!(!store.container_dir(&m.id).join("metadata.json.tmp").exists());
    }

    #[test]
    fn persisted_document_is_self_describing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MetadataStore::open(dir.path()).expect("open");
        let m = sample("c2");
        store.save(&m).expect("save");

        let raw = std::fs::read_to_string(store.container_dir(&m.id).join("metadata.json"))
            .expect("read");
        let json: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(json["status"], "created");
        assert!(json["pid"].is_null());
        assert_eq!(json["memory_limit"], 256);
    }

    #[test]
    fn load_all_skips_corrupt_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MetadataStore::open(dir.path()).expect("open");
        store.save(&sample("ok1")).expect("save");
        let bad = dir.path().join("bad1");
        std::fs::create_dir_all(&bad).expect("mkdir");
        std::fs::write(bad.join("metadata.json"), "{not json").expect("write");
        std::fs::create_dir_all(dir.path().join("empty")).expect("mkdir");

        let records = store.load_all().expect("load_all");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.as_str(), "ok1");
    }

    #[test]
    fn remove_deletes_directory_and_tolerates_absence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MetadataStore::open(dir.path()).expect("open");
        let m = sample("r1");
        store.save(&m).expect("save");
        store.remove(&m.id).expect("remove");
        assert!(!store.container_dir(&m.id).exists());
        store.remove(&m.id).expect("second remove");
    }

    #[test]
    fn registry_orders_by_creation_and_tracks_running() {
        let mut first = sample("z1");
        first.created = 1;
        let mut second = sample("a9");
        second.created = 2;
        second.mark_running(7, None);
        let registry = Registry::from_records(vec![second, first]);

        let ids: Vec<_> = registry.records().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![ContainerId::new("z1"), ContainerId::new("a9")]);
        assert_eq!(registry.running(), vec![(ContainerId::new("a9"), 7)]);
        assert!(registry.name_taken("mini-z1"));
    }
}
