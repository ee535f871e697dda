//! Layer diff between a snapshot and its parent.

use crate::cleanup::run_isolated;
use crate::CoreError;
use base64::Engine as _;
use chrono::Utc;
use std::fmt;
use std::str::FromStr;
use strata_schema::{Descriptor, MediaType};
use strata_store::{Context, Mount, SnapshotKind, Snapshotter};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    Uncompressed,
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    pub fn media_type(self) -> MediaType {
        match self {
            Compression::Uncompressed => MediaType::ImageLayer,
            Compression::Gzip => MediaType::ImageLayerGzip,
            Compression::Zstd => MediaType::ImageLayerZstd,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Uncompressed => write!(f, "uncompressed"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

impl FromStr for Compression {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uncompressed" | "none" => Ok(Compression::Uncompressed),
            "gzip" => Ok(Compression::Gzip),
            "zstd" => Ok(Compression::Zstd),
            other => Err(CoreError::Unsupported(format!(
                "compression {other:?} (expected gzip, zstd or uncompressed)"
            ))),
        }
    }
}

/// Options forwarded verbatim to the comparer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffOptions {
    pub compression: Compression,
    /// Overrides the media type derived from `compression`.
    pub media_type: Option<MediaType>,
}

impl DiffOptions {
    pub fn media_type(&self) -> MediaType {
        self.media_type
            .clone()
            .unwrap_or_else(|| self.compression.media_type())
    }
}

/// Computes the serialized difference between two mounted filesystem states
/// and stores it, returning a descriptor for the stored blob.
pub trait DiffComparer: Send + Sync {
    fn compare(
        &self,
        ctx: &Context,
        lower: &[Mount],
        upper: &[Mount],
        opts: &DiffOptions,
    ) -> Result<Descriptor, CoreError>;
}

/// A temporary view, removed through [`run_isolated`] when dropped.
struct ViewGuard<'a> {
    ctx: &'a Context,
    snapshotter: &'a dyn Snapshotter,
    key: String,
}

impl<'a> ViewGuard<'a> {
    fn open(
        ctx: &'a Context,
        snapshotter: &'a dyn Snapshotter,
        key: String,
        parent: Option<&str>,
    ) -> Result<(Self, Vec<Mount>), CoreError> {
        let mounts = snapshotter
            .view(ctx, &key, parent)
            .map_err(CoreError::upstream("open view"))?;
        debug!("opened view {key}");
        Ok((
            Self {
                ctx,
                snapshotter,
                key,
            },
            mounts,
        ))
    }
}

impl Drop for ViewGuard<'_> {
    fn drop(&mut self) {
        let key = std::mem::take(&mut self.key);
        let snapshotter = self.snapshotter;
        run_isolated(self.ctx, |ctx| match snapshotter.remove(ctx, &key) {
            Ok(()) => debug!("removed view {key}"),
            Err(e) => warn!("failed to remove view {key}: {e}"),
        });
    }
}

/// Suffix that keeps view keys from colliding between concurrent diffs.
pub(crate) fn unique_part() -> String {
    let nanos = Utc::now().timestamp_subsec_nanos();
    let bytes: [u8; 3] = rand::random();
    format!(
        "{nanos}-{}",
        base64::engine::general_purpose::URL_SAFE.encode(bytes)
    )
}

/// Compute the layer diff of `snapshot_id` against its parent.
///
/// With `remove_top_layer`, the lower bound is the grandparent when the
/// parent has one, so the diff also contains the parent's own changes. The
/// lower state is always opened as a temporary view; the upper state uses the
/// live mounts of an active snapshot and a second temporary view otherwise.
/// Every view opened here is removed before this function returns, on
/// success, error and cancellation alike.
pub fn compute_diff(
    ctx: &Context,
    snapshot_id: &str,
    snapshotter: &dyn Snapshotter,
    comparer: &dyn DiffComparer,
    remove_top_layer: bool,
    opts: &DiffOptions,
) -> Result<Descriptor, CoreError> {
    let info = snapshotter
        .stat(ctx, snapshot_id)
        .map_err(CoreError::upstream("stat snapshot"))?;

    let mut parent = info.parent.clone();
    if remove_top_layer {
        if let Some(p) = parent.as_deref() {
            let second = snapshotter
                .stat(ctx, p)
                .map_err(CoreError::upstream("stat parent snapshot"))?;
            if second.parent.is_some() {
                parent = second.parent;
            }
        }
    }

    let lower_key = format!(
        "{}-parent-view-{}",
        parent.as_deref().unwrap_or_default(),
        unique_part()
    );
    let (_lower_view, lower) = ViewGuard::open(ctx, snapshotter, lower_key, parent.as_deref())?;

    let mut _upper_view = None;
    let upper = if info.kind == SnapshotKind::Active {
        snapshotter
            .mounts(ctx, snapshot_id)
            .map_err(CoreError::upstream("get snapshot mounts"))?
    } else {
        let upper_key = format!("{snapshot_id}-view-{}", unique_part());
        let (guard, mounts) = ViewGuard::open(ctx, snapshotter, upper_key, Some(snapshot_id))?;
        _upper_view = Some(guard);
        mounts
    };

    comparer.compare(ctx, &lower, &upper, opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_parse_and_display() {
        for c in [Compression::Uncompressed, Compression::Gzip, Compression::Zstd] {
            assert_eq!(c.to_string().parse::<Compression>().unwrap(), c);
        }
        assert!(matches!(
            "brotli".parse::<Compression>(),
            Err(CoreError::Unsupported(_))
        ));
    }

    #[test]
    fn media_type_follows_compression() {
        let opts = DiffOptions {
            compression: Compression::Zstd,
            media_type: None,
        };
        assert_eq!(opts.media_type(), MediaType::ImageLayerZstd);
        let custom = DiffOptions {
            media_type: Some(MediaType::Other("application/x-custom".to_owned())),
            ..opts
        };
        assert_eq!(custom.media_type().to_string(), "application/x-custom");
    }

    #[test]
    fn unique_parts_differ() {
        let a = unique_part();
        let b = unique_part();
        assert_ne!(a, b);
        let (nanos, suffix) = a.split_once('-').unwrap();
        assert!(nanos.parse::<u32>().is_ok());
        assert_eq!(suffix.len(), 4);
    }
}
