use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout for the strata store.
///
/// ```text
/// <root>/content/blobs/sha256/<hex>
/// <root>/containers/<namespace>/<id>.json
/// <root>/images/<namespace>/<sha256(name)>.json
/// <root>/snapshots/<namespace>/<snapshotter>/{metadata,fs}
/// ```
///
/// Namespaced subdirectories are created lazily by the stores that own them.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn blobs_dir(&self) -> PathBuf {
        self.root.join("content").join("blobs").join("sha256")
    }

    #[inline]
    pub fn containers_dir(&self, namespace: &str) -> PathBuf {
        self.root.join("containers").join(namespace)
    }

    #[inline]
    pub fn images_dir(&self, namespace: &str) -> PathBuf {
        self.root.join("images").join(namespace)
    }

    #[inline]
    pub fn snapshotter_dir(&self, namespace: &str, snapshotter: &str) -> PathBuf {
        self.root.join("snapshots").join(namespace).join(snapshotter)
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.blobs_dir())?;
        fs::create_dir_all(self.root.join("containers"))?;
        fs::create_dir_all(self.root.join("images"))?;
        fs::create_dir_all(self.root.join("snapshots"))?;

        let version_path = self.root.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            crate::write_atomic(&self.root, &version_path, content.as_bytes())?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let version_path = self.root.join(VERSION_FILE);
        let content = fs::read_to_string(&version_path)?;
        let ver: StoreVersion = serde_json::from_str(&content)?;

        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}
