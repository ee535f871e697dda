//! OCI image types written by a commit, from `oci-spec`, plus the helpers
//! strata needs to move between its content digests and OCI descriptors.

use crate::types::Digest;
use thiserror::Error;

pub use oci_spec::image::{
    Config, ConfigBuilder, Descriptor, DescriptorBuilder, History, HistoryBuilder,
    ImageConfiguration, ImageConfigurationBuilder, ImageManifest, ImageManifestBuilder, MediaType,
    RootFs, RootFsBuilder,
};
pub use oci_spec::OciSpecError;

/// Annotation carrying the digest of the uncompressed layer tar (the diff id).
pub const ANNOTATION_UNCOMPRESSED: &str = "containerd.io/uncompressed";

/// `type` of an image rootfs.
pub const ROOTFS_TYPE_LAYERS: &str = "layers";

#[derive(Debug, Error)]
pub enum OciError {
    #[error("invalid digest {digest:?}: {source}")]
    InvalidDigest {
        digest: String,
        source: OciSpecError,
    },
    #[error("invalid image data: {0}")]
    Spec(#[from] OciSpecError),
}

fn oci_digest(digest: &Digest) -> Result<oci_spec::image::Digest, OciError> {
    digest
        .as_str()
        .parse()
        .map_err(|source| OciError::InvalidDigest {
            digest: digest.to_string(),
            source,
        })
}

/// Describe a stored blob.
pub fn descriptor(
    media_type: MediaType,
    digest: &Digest,
    size: u64,
) -> Result<Descriptor, OciError> {
    Ok(DescriptorBuilder::default()
        .media_type(media_type)
        .digest(oci_digest(digest)?)
        .size(size)
        .build()?)
}

/// Manifest of a single-platform image.
pub fn image_manifest(
    config: Descriptor,
    layers: Vec<Descriptor>,
) -> Result<ImageManifest, OciError> {
    Ok(ImageManifestBuilder::default()
        .schema_version(2_u32)
        .media_type(MediaType::ImageManifest)
        .config(config)
        .layers(layers)
        .build()?)
}

/// Empty config for the host platform, used when committing a container
/// that was not created from an image.
pub fn empty_image_config() -> Result<ImageConfiguration, OciError> {
    let rootfs = RootFsBuilder::default()
        .typ(ROOTFS_TYPE_LAYERS)
        .diff_ids(Vec::<String>::new())
        .build()?;
    Ok(ImageConfigurationBuilder::default().rootfs(rootfs).build()?)
}

/// Store-side view of an OCI descriptor.
pub trait DescriptorExt {
    /// Digest of the blob, as the content store keys it.
    fn blob_digest(&self) -> Digest;

    /// Digest of the uncompressed content: the annotation when present,
    /// otherwise the blob digest itself (uncompressed layers).
    fn uncompressed_digest(&self) -> Digest;

    /// Record `diff_id` as the uncompressed digest.
    fn set_uncompressed_digest(&mut self, diff_id: &Digest);
}

impl DescriptorExt for Descriptor {
    fn blob_digest(&self) -> Digest {
        Digest::new(self.digest().to_string())
    }

    fn uncompressed_digest(&self) -> Digest {
        self.annotations()
            .as_ref()
            .and_then(|a| a.get(ANNOTATION_UNCOMPRESSED))
            .map_or_else(|| self.blob_digest(), |d| Digest::new(d.clone()))
    }

    fn set_uncompressed_digest(&mut self, diff_id: &Digest) {
        let mut annotations = self.annotations().clone().unwrap_or_default();
        annotations.insert(ANNOTATION_UNCOMPRESSED.to_owned(), diff_id.to_string());
        self.set_annotations(Some(annotations));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_serializes_oci_fields() {
        let digest = Digest::sha256(b"layer");
        let d = descriptor(MediaType::ImageLayer, &digest, 5).unwrap();
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["mediaType"], "application/vnd.oci.image.layer.v1.tar");
        assert_eq!(json["digest"], digest.as_str());
        assert_eq!(json["size"], 5);
        assert!(json.get("annotations").is_none());
        assert_eq!(d.blob_digest(), digest);
    }

    #[test]
    fn malformed_digest_rejected() {
        let err =
            descriptor(MediaType::ImageLayer, &Digest::new("sha256:xyz"), 1).unwrap_err();
        assert!(matches!(err, OciError::InvalidDigest { .. }));
    }

    #[test]
    fn uncompressed_digest_prefers_annotation() {
        let blob = Digest::sha256(b"gz");
        let raw = Digest::sha256(b"raw");
        let mut d = descriptor(MediaType::ImageLayerGzip, &blob, 3).unwrap();
        assert_eq!(d.uncompressed_digest(), blob);
        d.set_uncompressed_digest(&raw);
        assert_eq!(d.uncompressed_digest(), raw);
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["annotations"][ANNOTATION_UNCOMPRESSED], raw.as_str());
    }

    #[test]
    fn base_config_fields_survive_roundtrip() {
        let json = r#"{
            "architecture": "arm64",
            "os": "linux",
            "variant": "v8",
            "config": {"Cmd": ["sh"], "StopSignal": "SIGTERM"},
            "rootfs": {"type": "layers", "diff_ids": ["sha256:aa"]}
        }"#;
        let cfg: ImageConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(
            cfg.config().as_ref().and_then(|c| c.cmd().clone()),
            Some(vec!["sh".to_owned()])
        );
        assert_eq!(cfg.rootfs().diff_ids().len(), 1);

        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back["variant"], "v8");
        assert_eq!(back["config"]["StopSignal"], "SIGTERM");
    }

    #[test]
    fn manifest_has_schema_version_two() {
        let cfg = descriptor(MediaType::ImageConfig, &Digest::sha256(b"cfg"), 10).unwrap();
        let m = image_manifest(cfg, Vec::new()).unwrap();
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["schemaVersion"], 2);
        assert_eq!(json["mediaType"], "application/vnd.oci.image.manifest.v1+json");
        assert_eq!(json["config"]["mediaType"], "application/vnd.oci.image.config.v1+json");
    }

    #[test]
    fn empty_config_targets_host_platform() {
        let cfg = empty_image_config().unwrap();
        let json = serde_json::to_value(&cfg).unwrap();
        assert_eq!(json["rootfs"]["type"], ROOTFS_TYPE_LAYERS);
        assert!(cfg.rootfs().diff_ids().is_empty());
        assert!(!cfg.os().to_string().is_empty());
    }
}
