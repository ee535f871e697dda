use crate::context::Context;
use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotKind {
    /// Writable snapshot, typically a running container's rootfs.
    Active,
    /// Immutable snapshot that can be used as a parent.
    Committed,
    /// Read-only projection of a committed snapshot.
    View,
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotKind::Active => write!(f, "active"),
            SnapshotKind::Committed => write!(f, "committed"),
            SnapshotKind::View => write!(f, "view"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub name: String,
    pub kind: SnapshotKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub inodes: u64,
    pub size: u64,
}

/// A mount describing how to materialize a snapshot's filesystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mount {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: PathBuf,
    #[serde(default)]
    pub options: Vec<String>,
}

impl Mount {
    pub fn bind(source: impl Into<PathBuf>, read_only: bool) -> Self {
        Self {
            kind: "bind".to_owned(),
            source: source.into(),
            options: vec![
                "rbind".to_owned(),
                if read_only { "ro" } else { "rw" }.to_owned(),
            ],
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }
}

/// Snapshot service: named filesystem states in a parent/child graph.
///
/// Every call takes the caller's `Context` and fails with
/// `StoreError::Context` once it is done.
pub trait Snapshotter: Send + Sync {
    fn name(&self) -> &str;

    fn stat(&self, ctx: &Context, key: &str) -> Result<SnapshotInfo, StoreError>;

    /// Update mutable fields of a snapshot. Only labels are mutable:
    /// `fieldpaths` may be empty or `["labels"]` (replace all labels) or
    /// contain `"labels.<key>"` entries (set or delete a single label).
    fn update(
        &self,
        ctx: &Context,
        info: &SnapshotInfo,
        fieldpaths: &[&str],
    ) -> Result<SnapshotInfo, StoreError>;

    fn usage(&self, ctx: &Context, key: &str) -> Result<Usage, StoreError>;

    /// Mounts for an active snapshot or a view.
    fn mounts(&self, ctx: &Context, key: &str) -> Result<Vec<Mount>, StoreError>;

    /// Create a writable snapshot on top of a committed parent.
    fn prepare(
        &self,
        ctx: &Context,
        key: &str,
        parent: Option<&str>,
        labels: BTreeMap<String, String>,
    ) -> Result<Vec<Mount>, StoreError>;

    /// Create a read-only view of a committed parent (or an empty view).
    fn view(&self, ctx: &Context, key: &str, parent: Option<&str>)
        -> Result<Vec<Mount>, StoreError>;

    /// Turn the active snapshot `key` into the committed snapshot `name`.
    fn commit(&self, ctx: &Context, name: &str, key: &str) -> Result<(), StoreError>;

    fn remove(&self, ctx: &Context, key: &str) -> Result<(), StoreError>;

    /// Visit every snapshot, ordered by name.
    fn walk(
        &self,
        ctx: &Context,
        visit: &mut dyn FnMut(&SnapshotInfo) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;
}
