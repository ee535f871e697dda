//! Snapshot service, content store, and container/image records for strata.
//!
//! This crate provides the storage layer: the cancellable execution `Context`
//! threaded through every call, the `Snapshotter` service trait with a
//! directory-backed `LocalSnapshotter`, the sha256 `ContentStore` for layer,
//! config and manifest blobs, and the `ContainerStore` / `ImageStore` record
//! stores. `StoreLayout` owns the on-disk directory structure.

pub mod containers;
pub mod content;
pub mod context;
pub mod images;
pub mod layout;
pub mod local;
pub mod snapshot;

pub use containers::{ContainerRecord, ContainerState, ContainerStore};
pub use content::{ContentStore, ContentWriter};
pub use context::{Context, ContextError, DEFAULT_NAMESPACE};
pub use images::{ImageRecord, ImageStore};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use local::LocalSnapshotter;
pub use snapshot::{Mount, SnapshotInfo, SnapshotKind, Snapshotter, Usage};

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// POSIX does not guarantee a rename survives a crash until the parent
/// directory itself has been synced.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write `data` to `dest` atomically: temp file in `dir`, fsync, rename, fsync dir.
pub(crate) fn write_atomic(dir: &Path, dest: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

/// Hex sha256 of a string key, used to derive filesystem-safe file names.
pub(crate) fn key_id(key: &str) -> String {
    use sha2::{Digest as _, Sha256};
    hex::encode(Sha256::digest(key.as_bytes()))
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}: not found")]
    NotFound(String),
    #[error("{0}: already exists")]
    AlreadyExists(String),
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error("integrity check failed for '{name}': expected {expected}, got {actual}")]
    IntegrityFailure {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Oci(#[from] strata_schema::OciError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
