use crate::context::Context;
use crate::snapshot::{Mount, SnapshotInfo, SnapshotKind, Snapshotter, Usage};
use crate::{key_id, write_atomic, StoreError};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory-backed snapshotter.
///
/// Each active snapshot owns a full copy of its parent's tree, so mounts are
/// plain bind mounts and no privileges are needed to read them. Views do not
/// copy: they bind the committed parent's tree read-only. Snapshot metadata is
/// stored as one JSON file per key, named by the sha256 of the key.
pub struct LocalSnapshotter {
    name: String,
    root: PathBuf,
}

impl LocalSnapshotter {
    pub fn open(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root: PathBuf = root.into();
        fs::create_dir_all(root.join("metadata"))?;
        fs::create_dir_all(root.join("fs"))?;
        Ok(Self {
            name: name.into(),
            root,
        })
    }

    fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    fn metadata_path(&self, key: &str) -> PathBuf {
        self.metadata_dir().join(format!("{}.json", key_id(key)))
    }

    /// Directory holding the filesystem tree of `key`.
    pub fn fs_path(&self, key: &str) -> PathBuf {
        self.root.join("fs").join(key_id(key))
    }

    fn read_info(&self, key: &str) -> Result<SnapshotInfo, StoreError> {
        let path = self.metadata_path(key);
        if !path.exists() {
            return Err(StoreError::NotFound(format!("snapshot {key}")));
        }
        let content = fs::read_to_string(&path)?;
        let info: SnapshotInfo = serde_json::from_str(&content)?;
        if info.name != key {
            return Err(StoreError::IntegrityFailure {
                name: path.display().to_string(),
                expected: key.to_owned(),
                actual: info.name,
            });
        }
        Ok(info)
    }

    fn write_info(&self, info: &SnapshotInfo) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(info)?;
        write_atomic(
            &self.metadata_dir(),
            &self.metadata_path(&info.name),
            content.as_bytes(),
        )
    }

    fn committed_parent(&self, parent: Option<&str>) -> Result<Option<SnapshotInfo>, StoreError> {
        let Some(parent) = parent else {
            return Ok(None);
        };
        let info = self.read_info(parent)?;
        if info.kind != SnapshotKind::Committed {
            return Err(StoreError::FailedPrecondition(format!(
                "parent snapshot {parent} is {}, not committed",
                info.kind
            )));
        }
        Ok(Some(info))
    }

    fn create(
        &self,
        ctx: &Context,
        key: &str,
        parent: Option<&str>,
        kind: SnapshotKind,
        labels: BTreeMap<String, String>,
    ) -> Result<SnapshotInfo, StoreError> {
        ctx.check()?;
        if key.is_empty() {
            return Err(StoreError::InvalidArgument(
                "snapshot key must not be empty".to_owned(),
            ));
        }
        if self.metadata_path(key).exists() {
            return Err(StoreError::AlreadyExists(format!("snapshot {key}")));
        }
        self.committed_parent(parent)?;

        let fs_dir = self.fs_path(key);
        match (kind, parent) {
            (SnapshotKind::Active, Some(p)) => {
                if let Err(e) = copy_tree(ctx, &self.fs_path(p), &fs_dir) {
                    let _ = fs::remove_dir_all(&fs_dir);
                    return Err(e);
                }
            }
            (SnapshotKind::Active, None) | (SnapshotKind::View, None) => {
                fs::create_dir_all(&fs_dir)?;
            }
            // Views of a committed parent bind the parent's tree directly.
            _ => {}
        }

        let now = Utc::now();
        let info = SnapshotInfo {
            name: key.to_owned(),
            kind,
            parent: parent.map(str::to_owned),
            created: now,
            updated: now,
            labels,
        };
        if let Err(e) = self.write_info(&info) {
            let _ = fs::remove_dir_all(&fs_dir);
            return Err(e);
        }
        debug!("created {kind} snapshot {key} in {}", self.name);
        Ok(info)
    }

    fn list_infos(&self) -> Result<Vec<SnapshotInfo>, StoreError> {
        let mut infos = Vec::new();
        for entry in fs::read_dir(self.metadata_dir())? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|c| serde_json::from_str::<SnapshotInfo>(&c).map_err(StoreError::from));
            match parsed {
                Ok(info) => infos.push(info),
                Err(e) => warn!("skipping corrupted snapshot metadata {}: {e}", path.display()),
            }
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }

    /// Mounts of a snapshot record. Never consults the context, so a record
    /// that `create` has written is always returned to the caller.
    fn mounts_for(&self, info: &SnapshotInfo) -> Result<Vec<Mount>, StoreError> {
        let key = info.name.as_str();
        match (info.kind, info.parent.as_deref()) {
            (SnapshotKind::Active, _) => Ok(vec![Mount::bind(self.fs_path(key), false)]),
            (SnapshotKind::View, Some(parent)) => Ok(vec![Mount::bind(self.fs_path(parent), true)]),
            (SnapshotKind::View, None) => Ok(vec![Mount::bind(self.fs_path(key), true)]),
            (SnapshotKind::Committed, _) => Err(StoreError::FailedPrecondition(format!(
                "snapshot {key} is committed and cannot be mounted; create a view"
            ))),
        }
    }
}

impl Snapshotter for LocalSnapshotter {
    fn name(&self) -> &str {
        &self.name
    }

    fn stat(&self, ctx: &Context, key: &str) -> Result<SnapshotInfo, StoreError> {
        ctx.check()?;
        self.read_info(key)
    }

    fn update(
        &self,
        ctx: &Context,
        info: &SnapshotInfo,
        fieldpaths: &[&str],
    ) -> Result<SnapshotInfo, StoreError> {
        ctx.check()?;
        let mut current = self.read_info(&info.name)?;
        if fieldpaths.is_empty() {
            current.labels.clone_from(&info.labels);
        }
        for path in fieldpaths {
            if *path == "labels" {
                current.labels.clone_from(&info.labels);
            } else if let Some(label) = path.strip_prefix("labels.") {
                match info.labels.get(label) {
                    Some(value) => {
                        current.labels.insert(label.to_owned(), value.clone());
                    }
                    None => {
                        current.labels.remove(label);
                    }
                }
            } else {
                return Err(StoreError::InvalidArgument(format!(
                    "cannot update {path:?} field on snapshot {}",
                    info.name
                )));
            }
        }
        current.updated = Utc::now();
        self.write_info(&current)?;
        Ok(current)
    }

    fn usage(&self, ctx: &Context, key: &str) -> Result<Usage, StoreError> {
        ctx.check()?;
        self.read_info(key)?;
        let dir = self.fs_path(key);
        let mut usage = Usage::default();
        if dir.is_dir() {
            usage.inodes = 1;
            disk_usage(ctx, &dir, &mut usage)?;
        }
        Ok(usage)
    }

    fn mounts(&self, ctx: &Context, key: &str) -> Result<Vec<Mount>, StoreError> {
        ctx.check()?;
        let info = self.read_info(key)?;
        self.mounts_for(&info)
    }

    fn prepare(
        &self,
        ctx: &Context,
        key: &str,
        parent: Option<&str>,
        labels: BTreeMap<String, String>,
    ) -> Result<Vec<Mount>, StoreError> {
        let info = self.create(ctx, key, parent, SnapshotKind::Active, labels)?;
        self.mounts_for(&info)
    }

    fn view(
        &self,
        ctx: &Context,
        key: &str,
        parent: Option<&str>,
    ) -> Result<Vec<Mount>, StoreError> {
        let info = self.create(ctx, key, parent, SnapshotKind::View, BTreeMap::new())?;
        self.mounts_for(&info)
    }

    fn commit(&self, ctx: &Context, name: &str, key: &str) -> Result<(), StoreError> {
        ctx.check()?;
        let info = self.read_info(key)?;
        if info.kind != SnapshotKind::Active {
            return Err(StoreError::FailedPrecondition(format!(
                "snapshot {key} is {}, only active snapshots can be committed",
                info.kind
            )));
        }
        if self.metadata_path(name).exists() {
            return Err(StoreError::AlreadyExists(format!("snapshot {name}")));
        }

        fs::rename(self.fs_path(key), self.fs_path(name))?;
        let committed = SnapshotInfo {
            name: name.to_owned(),
            kind: SnapshotKind::Committed,
            parent: info.parent,
            created: info.created,
            updated: Utc::now(),
            labels: info.labels,
        };
        self.write_info(&committed)?;
        fs::remove_file(self.metadata_path(key))?;
        debug!("committed snapshot {key} as {name}");
        Ok(())
    }

    fn remove(&self, ctx: &Context, key: &str) -> Result<(), StoreError> {
        ctx.check()?;
        self.read_info(key)?;
        if let Some(child) = self
            .list_infos()?
            .into_iter()
            .find(|i| i.parent.as_deref() == Some(key))
        {
            return Err(StoreError::FailedPrecondition(format!(
                "cannot remove snapshot {key}: snapshot {} depends on it",
                child.name
            )));
        }

        // A record never outlives its tree.
        fs::remove_file(self.metadata_path(key))?;
        let dir = self.fs_path(key);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        debug!("removed snapshot {key}");
        Ok(())
    }

    fn walk(
        &self,
        ctx: &Context,
        visit: &mut dyn FnMut(&SnapshotInfo) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        for info in self.list_infos()? {
            ctx.check()?;
            visit(&info)?;
        }
        Ok(())
    }
}

/// Recursively copy `src` into a new directory `dst`, preserving permissions
/// and symlinks. Special files are skipped.
fn copy_tree(ctx: &Context, src: &Path, dst: &Path) -> Result<(), StoreError> {
    fs::create_dir_all(dst)?;
    fs::set_permissions(dst, fs::symlink_metadata(src)?.permissions())?;
    for entry in fs::read_dir(src)? {
        ctx.check()?;
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let ft = entry.file_type()?;

        if ft.is_dir() {
            copy_tree(ctx, &src_path, &dst_path)?;
        } else if ft.is_file() {
            fs::copy(&src_path, &dst_path)?;
        } else if ft.is_symlink() {
            let target = fs::read_link(&src_path)?;
            std::os::unix::fs::symlink(target, &dst_path)?;
        } else {
            warn!("skipping unsupported file type: {}", src_path.display());
        }
    }
    Ok(())
}

fn disk_usage(ctx: &Context, dir: &Path, usage: &mut Usage) -> Result<(), StoreError> {
    for entry in fs::read_dir(dir)? {
        ctx.check()?;
        let entry = entry?;
        let meta = fs::symlink_metadata(entry.path())?;
        usage.inodes += 1;
        if meta.is_dir() {
            disk_usage(ctx, &entry.path(), usage)?;
        } else {
            usage.size += meta.len();
        }
    }
    Ok(())
}
