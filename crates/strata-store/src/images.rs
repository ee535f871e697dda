use crate::layout::StoreLayout;
use crate::{key_id, write_atomic, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use strata_schema::Descriptor;

/// Named pointer to an image manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRecord {
    /// Fully qualified reference, e.g. `docker.io/library/app:latest`.
    pub name: String,
    /// Descriptor of the image manifest.
    pub target: Descriptor,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ImageRecord {
    pub fn new(name: impl Into<String>, target: Descriptor) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            target,
            created_at: now,
            updated_at: now,
            labels: BTreeMap::new(),
        }
    }
}

/// Image records of one namespace, keyed by reference name.
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    pub fn new(layout: &StoreLayout, namespace: &str) -> Self {
        Self {
            dir: layout.images_dir(namespace),
        }
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key_id(name)))
    }

    /// Create or retarget an image. Retargeting keeps the original
    /// `created_at`.
    pub fn put(&self, record: &ImageRecord) -> Result<ImageRecord, StoreError> {
        if record.name.is_empty() {
            return Err(StoreError::InvalidArgument(
                "image name must not be empty".to_owned(),
            ));
        }
        fs::create_dir_all(&self.dir)?;

        let mut stored = record.clone();
        match self.get(&record.name) {
            Ok(existing) => {
                stored.created_at = existing.created_at;
                stored.updated_at = Utc::now();
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let content = serde_json::to_string_pretty(&stored)?;
        write_atomic(&self.dir, &self.record_path(&record.name), content.as_bytes())?;
        Ok(stored)
    }

    pub fn get(&self, name: &str) -> Result<ImageRecord, StoreError> {
        let path = self.record_path(name);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("image {name}")));
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn remove(&self, name: &str) -> Result<(), StoreError> {
        let path = self.record_path(name);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("image {name}")));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<ImageRecord>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|c| serde_json::from_str::<ImageRecord>(&c).map_err(StoreError::from));
            match parsed {
                Ok(record) => results.push(record),
                Err(e) => tracing::warn!("skipping corrupted image record {}: {e}", path.display()),
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }
}
