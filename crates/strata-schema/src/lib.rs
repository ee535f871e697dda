//! Change directives, image references, and OCI image types for strata.
//!
//! This crate defines the schema layer: parsing of `--change` directives into a
//! `ChangeSet`, normalization of image references (`ImageReference`), and the
//! `oci-spec` descriptor, manifest, and config types written by a commit.

pub mod changes;
pub mod oci;
pub mod reference;
pub mod types;

pub use changes::{parse_changes, ChangeError, ChangeSet};
pub use oci::{
    descriptor, empty_image_config, image_manifest, Config, Descriptor, DescriptorExt, History,
    HistoryBuilder, ImageConfiguration, ImageManifest, MediaType, OciError, RootFsBuilder,
    ANNOTATION_UNCOMPRESSED, ROOTFS_TYPE_LAYERS,
};
pub use reference::{ImageReference, ReferenceError};
pub use types::{ContainerId, Digest};
