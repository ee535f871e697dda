//! Commit engine for strata: layer diffs over the snapshot graph.
//!
//! This crate ties the schema and store crates together. `compute_diff` finds
//! the before/after states of a snapshot, opens temporary views where needed
//! and hands both mount sets to a `DiffComparer`; every view it opens is
//! released through `run_isolated`, which shields cleanup from the caller's
//! cancellation. `commit_container` resolves a container reference and runs
//! the commit procedure that turns the diff into a new OCI image. The snapshot
//! list/info/update actions, task pause/resume, the store lock and the
//! configuration file live here as well.

pub mod cleanup;
pub mod commit;
pub mod concurrency;
pub mod config;
pub mod diff;
pub mod engine;
pub mod resolve;
pub mod snapshots;
pub mod task;
pub mod walking;

pub use cleanup::{run_isolated, CLEANUP_TIMEOUT};
pub use commit::{commit, commit_container, CommitOptions, CommitOpts, COMMIT_CREATED_BY};
pub use concurrency::{install_signal_handler, StoreLock};
pub use config::{Config, DEFAULT_SNAPSHOTTER};
pub use diff::{compute_diff, Compression, DiffComparer, DiffOptions};
pub use engine::Engine;
pub use resolve::{walk_containers, Found};
pub use snapshots::{
    list_snapshots, parse_labels, snapshot_info, update_snapshot, SnapshotDetails,
    SnapshotListItem,
};
pub use task::{PauseGuard, SignalTasks, TaskControl};
pub use walking::WalkingComparer;

use strata_schema::{ChangeError, OciError, ReferenceError};
use strata_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no such {0}")]
    NotFound(String),
    #[error("multiple IDs found with provided prefix: {0}")]
    AmbiguousReference(String),
    #[error(transparent)]
    Change(#[from] ChangeError),
    #[error("invalid reference: {0}")]
    Reference(#[from] ReferenceError),
    #[error("failed to {step}: {source}")]
    Upstream { step: String, source: StoreError },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("invalid label format {0:?} (expected LABEL=VALUE)")]
    InvalidLabel(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Oci(#[from] OciError),
}

impl CoreError {
    /// Map a store error from `step`. Not-found errors keep their own variant
    /// so callers can tell a missing snapshot from a failing service.
    pub(crate) fn upstream(step: &str) -> impl FnOnce(StoreError) -> CoreError + '_ {
        move |source| match source {
            StoreError::NotFound(what) => CoreError::NotFound(what),
            source => CoreError::Upstream {
                step: step.to_owned(),
                source,
            },
        }
    }

    /// Wrap a store error from `step` as-is, without not-found mapping.
    pub(crate) fn wrap(step: &str) -> impl FnOnce(StoreError) -> CoreError + '_ {
        move |source| CoreError::Upstream {
            step: step.to_owned(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            CoreError::NotFound(_) => true,
            CoreError::Upstream { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True when the operation stopped because its context was canceled or
    /// ran past its deadline.
    pub fn is_canceled(&self) -> bool {
        matches!(
            self,
            CoreError::Upstream {
                source: StoreError::Context(_),
                ..
            }
        )
    }

    /// Errors caused by user input rather than by the store or the system.
    /// A missing object counts as input even when a step wrapped it.
    pub fn is_input_error(&self) -> bool {
        self.is_not_found()
            || matches!(
                self,
                CoreError::AmbiguousReference(_)
                    | CoreError::Change(_)
                    | CoreError::Reference(_)
                    | CoreError::InvalidLabel(_)
                    | CoreError::Unsupported(_)
                    | CoreError::Config(_)
            )
    }
}
