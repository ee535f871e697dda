//! Read and label operations over a snapshotter, as exposed by `strata snapshot`.

use crate::CoreError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use strata_store::{Context, SnapshotInfo, SnapshotKind, Snapshotter, Usage};
use tracing::{error, warn};

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotListItem {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub kind: SnapshotKind,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub snapshotter: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotDetails {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    pub kind: SnapshotKind,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Absent when the snapshotter could not compute usage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub snapshotter: String,
}

pub fn list_snapshots(
    ctx: &Context,
    snapshotter: &dyn Snapshotter,
) -> Result<Vec<SnapshotListItem>, CoreError> {
    let mut items = Vec::new();
    snapshotter
        .walk(ctx, &mut |info: &SnapshotInfo| {
            items.push(SnapshotListItem {
                name: info.name.clone(),
                parent: info.parent.clone(),
                kind: info.kind,
                created: info.created,
                updated: info.updated,
                snapshotter: snapshotter.name().to_owned(),
            });
            Ok(())
        })
        .map_err(|e| {
            error!("failed to walk snapshots: {e}");
            CoreError::wrap("list snapshots")(e)
        })?;
    Ok(items)
}

pub fn snapshot_info(
    ctx: &Context,
    snapshotter: &dyn Snapshotter,
    id: &str,
) -> Result<SnapshotDetails, CoreError> {
    let info = snapshotter
        .stat(ctx, id)
        .map_err(CoreError::wrap("get snapshot info"))?;
    let usage = match snapshotter.usage(ctx, id) {
        Ok(usage) => Some(usage),
        Err(e) => {
            warn!("failed to get snapshot usage for {id}: {e}");
            None
        }
    };
    Ok(SnapshotDetails {
        name: info.name,
        parent: info.parent,
        kind: info.kind,
        created: info.created,
        updated: info.updated,
        labels: info.labels,
        usage,
        snapshotter: snapshotter.name().to_owned(),
    })
}

/// Parse `KEY=VALUE` arguments. The value may be empty and may contain `=`.
pub fn parse_labels<S: AsRef<str>>(args: &[S]) -> Result<BTreeMap<String, String>, CoreError> {
    let mut labels = BTreeMap::new();
    for arg in args {
        let arg = arg.as_ref();
        let (key, value) = arg
            .split_once('=')
            .ok_or_else(|| CoreError::InvalidLabel(arg.to_owned()))?;
        labels.insert(key.to_owned(), value.to_owned());
    }
    Ok(labels)
}

/// Merge `labels` (`KEY=VALUE`) into the snapshot's existing labels.
pub fn update_snapshot<S: AsRef<str>>(
    ctx: &Context,
    snapshotter: &dyn Snapshotter,
    id: &str,
    labels: &[S],
) -> Result<SnapshotInfo, CoreError> {
    let labels = parse_labels(labels)?;
    let mut info = snapshotter
        .stat(ctx, id)
        .map_err(CoreError::wrap("get snapshot info"))?;
    info.labels.extend(labels);
    snapshotter
        .update(ctx, &info, &["labels"])
        .map_err(CoreError::wrap("update snapshot"))
}
