use crate::layout::StoreLayout;
use crate::{write_atomic, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use strata_schema::ContainerId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Paused => write!(f, "paused"),
            ContainerState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: ContainerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Image the container was created from, by reference name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub snapshotter: String,
    pub snapshot_key: String,
    pub state: ContainerState,
    /// Task process id while running or paused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    /// sha256 checksum over the record. `None` for records written by hand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ContainerRecord {
    pub fn new(
        id: impl Into<ContainerId>,
        snapshotter: impl Into<String>,
        snapshot_key: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: None,
            image: None,
            snapshotter: snapshotter.into(),
            snapshot_key: snapshot_key.into(),
            state: ContainerState::Created,
            pid: None,
            labels: BTreeMap::new(),
            created_at: Utc::now(),
            checksum: None,
        }
    }

    fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(hex::encode(Sha256::digest(json.as_bytes())))
    }
}

fn validate_container_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() || id.len() > 128 {
        return Err(StoreError::InvalidArgument(
            "container id must be 1-128 characters".to_owned(),
        ));
    }
    if !id
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.')
    {
        return Err(StoreError::InvalidArgument(format!(
            "container id {id:?} must match [a-zA-Z0-9_.-]"
        )));
    }
    Ok(())
}

/// Container records of one namespace, one JSON file per container.
pub struct ContainerStore {
    dir: PathBuf,
}

impl ContainerStore {
    pub fn new(layout: &StoreLayout, namespace: &str) -> Self {
        Self {
            dir: layout.containers_dir(namespace),
        }
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn put(&self, record: &ContainerRecord) -> Result<(), StoreError> {
        validate_container_id(&record.id)?;
        fs::create_dir_all(&self.dir)?;

        let mut with_checksum = record.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;
        write_atomic(&self.dir, &self.record_path(&record.id), content.as_bytes())
    }

    pub fn get(&self, id: &str) -> Result<ContainerRecord, StoreError> {
        validate_container_id(id).map_err(|_| StoreError::NotFound(format!("container {id}")))?;
        let path = self.record_path(id);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("container {id}")));
        }
        let content = fs::read_to_string(&path)?;
        let record: ContainerRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    name: format!("container {id}"),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(record)
    }

    pub fn update_state(
        &self,
        id: &str,
        state: ContainerState,
        pid: Option<u32>,
    ) -> Result<ContainerRecord, StoreError> {
        let mut record = self.get(id)?;
        record.state = state;
        record.pid = pid;
        self.put(&record)?;
        Ok(record)
    }

    pub fn remove(&self, id: &str) -> Result<(), StoreError> {
        let path = self.record_path(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// All records, sorted by id. Corrupted entries are skipped with a warning.
    pub fn list(&self) -> Result<Vec<ContainerRecord>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            match self.get(id) {
                Ok(record) => results.push(record),
                Err(e) => tracing::warn!("skipping corrupted container record '{id}': {e}"),
            }
        }
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, ContainerStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let store = ContainerStore::new(&layout, "default");
        (dir, store)
    }

    fn record(id: &str) -> ContainerRecord {
        let mut r = ContainerRecord::new(id, "overlayfs", id);
        r.name = Some(format!("name-{id}"));
        r
    }

    #[test]
    fn put_and_get_roundtrip() {
        let (_dir, store) = test_store();
        store.put(&record("abc123")).unwrap();
        let got = store.get("abc123").unwrap();
        assert_eq!(got.name.as_deref(), Some("name-abc123"));
        assert_eq!(got.state, ContainerState::Created);
        assert!(got.checksum.is_some());
    }

    #[test]
    fn get_missing_is_not_found() {
        let (_dir, store) = test_store();
        assert!(store.get("missing").unwrap_err().is_not_found());
        assert!(store.get("../escape").unwrap_err().is_not_found());
    }

    #[test]
    fn invalid_id_rejected() {
        let (_dir, store) = test_store();
        assert!(matches!(
            store.put(&record("a/b")).unwrap_err(),
            StoreError::InvalidArgument(_)
        ));
    }

    #[test]
    fn update_state_records_pid() {
        let (_dir, store) = test_store();
        store.put(&record("c1")).unwrap();
        let r = store.update_state("c1", ContainerState::Running, Some(42)).unwrap();
        assert_eq!(r.pid, Some(42));
        assert_eq!(store.get("c1").unwrap().state, ContainerState::Running);
    }

    #[test]
    fn tampered_record_fails_integrity() {
        let (dir, store) = test_store();
        store.put(&record("c1")).unwrap();
        let path = dir.path().join("containers/default/c1.json");
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("\"created\"", "\"running\"")).unwrap();
        assert!(matches!(
            store.get("c1"),
            Err(StoreError::IntegrityFailure { .. })
        ));
        // list() skips it instead of failing.
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn list_is_sorted() {
        let (_dir, store) = test_store();
        store.put(&record("bbb")).unwrap();
        store.put(&record("aaa")).unwrap();
        let ids: Vec<_> = store.list().unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![ContainerId::new("aaa"), ContainerId::new("bbb")]);
    }

    #[test]
    fn namespaces_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        ContainerStore::new(&layout, "a").put(&record("c1")).unwrap();
        assert!(ContainerStore::new(&layout, "b").list().unwrap().is_empty());
    }

    #[test]
    fn remove_record() {
        let (_dir, store) = test_store();
        store.put(&record("c1")).unwrap();
        store.remove("c1").unwrap();
        assert!(store.get("c1").unwrap_err().is_not_found());
        store.remove("c1").unwrap();
    }

    #[test]
    fn state_display() {
        assert_eq!(ContainerState::Paused.to_string(), "paused");
    }
}
