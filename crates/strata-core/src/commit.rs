//! Committing a container's filesystem changes into a new image.

use crate::diff::{compute_diff, Compression, DiffOptions};
use crate::engine::Engine;
use crate::resolve::walk_containers;
use crate::task::PauseGuard;
use crate::CoreError;
use chrono::Utc;
use std::io::Write;
use strata_schema::{
    empty_image_config, image_manifest, parse_changes, ChangeSet, Descriptor, DescriptorExt,
    Digest, HistoryBuilder, ImageConfiguration, ImageManifest, ImageReference, MediaType,
    OciError, RootFsBuilder,
};
use strata_store::{ContainerRecord, Context, ImageRecord};
use tracing::{debug, info, warn};

/// `created_by` of the history entry added by a commit.
pub const COMMIT_CREATED_BY: &str = "strata commit";

/// Raw commit options as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub author: Option<String>,
    pub message: Option<String>,
    /// Unparsed `CMD` / `ENTRYPOINT` directives.
    pub changes: Vec<String>,
    pub pause: bool,
    pub compression: Compression,
    pub remove_top_layer: bool,
    /// Used for containers that do not record a snapshotter.
    pub snapshotter: String,
}

/// Validated options for a single commit.
#[derive(Debug, Clone)]
pub struct CommitOpts {
    pub author: String,
    pub message: String,
    pub reference: ImageReference,
    pub pause: bool,
    pub changes: ChangeSet,
    pub compression: Compression,
    pub remove_top_layer: bool,
    pub snapshotter: String,
}

fn base_image(
    ctx: &Context,
    engine: &Engine,
    container: &ContainerRecord,
) -> Result<(ImageConfiguration, Vec<Descriptor>), CoreError> {
    let Some(image) = container.image.as_deref() else {
        debug!("container {} has no base image", container.id.short());
        return Ok((empty_image_config()?, Vec::new()));
    };
    let record = engine
        .images(ctx)
        .get(image)
        .map_err(CoreError::upstream("get base image"))?;
    let manifest: ImageManifest = engine
        .content()
        .get_json(&record.target.blob_digest())
        .map_err(CoreError::wrap("read base image manifest"))?;
    let config: ImageConfiguration = engine
        .content()
        .get_json(&manifest.config().blob_digest())
        .map_err(CoreError::wrap("read base image config"))?;
    Ok((config, manifest.layers().clone()))
}

fn apply_changes(config: &mut ImageConfiguration, changes: &ChangeSet) {
    if changes.is_empty() {
        return;
    }
    let mut runtime = config.config().clone().unwrap_or_default();
    if let Some(entrypoint) = &changes.entrypoint {
        runtime.set_entrypoint(Some(entrypoint.clone()));
        if changes.cmd.is_none() {
            runtime.set_cmd(None);
        }
    }
    if let Some(cmd) = &changes.cmd {
        runtime.set_cmd(Some(cmd.clone()));
    }
    config.set_config(Some(runtime));
}

/// Append the new layer and its history entry to `config`.
fn record_layer(
    config: &mut ImageConfiguration,
    layer: &Descriptor,
    opts: &CommitOpts,
    created: &str,
) -> Result<(), OciError> {
    let mut diff_ids = config.rootfs().diff_ids().clone();
    diff_ids.push(layer.uncompressed_digest().into_inner());
    let rootfs = RootFsBuilder::default()
        .typ(config.rootfs().typ().clone())
        .diff_ids(diff_ids)
        .build()?;
    config.set_rootfs(rootfs);

    let mut entry = HistoryBuilder::default()
        .created(created)
        .created_by(COMMIT_CREATED_BY)
        .empty_layer(false);
    if !opts.author.is_empty() {
        entry = entry.author(opts.author.as_str());
    }
    if !opts.message.is_empty() {
        entry = entry.comment(opts.message.as_str());
    }
    let mut history = config.history().clone().unwrap_or_default();
    history.push(entry.build()?);
    config.set_history(Some(history));

    if !opts.author.is_empty() {
        config.set_author(Some(opts.author.clone()));
    }
    config.set_created(Some(created.to_owned()));
    Ok(())
}

/// Commit `container` into a new image named `opts.reference`.
///
/// Returns the image id, which is the digest of the new image config.
pub fn commit(
    ctx: &Context,
    engine: &Engine,
    container: &ContainerRecord,
    opts: &CommitOpts,
) -> Result<Digest, CoreError> {
    info!(
        "committing container {} as {}",
        container.id.short(),
        opts.reference
    );
    let (mut config, mut layers) = base_image(ctx, engine, container)?;

    let snapshotter_name = if container.snapshotter.is_empty() {
        opts.snapshotter.as_str()
    } else {
        container.snapshotter.as_str()
    };
    let snapshotter = engine.snapshot_service(ctx, snapshotter_name)?;

    let diff_opts = DiffOptions {
        compression: opts.compression,
        media_type: None,
    };
    let layer = {
        let _pause = if opts.pause {
            Some(PauseGuard::pause(ctx, engine.tasks(), container)?)
        } else {
            None
        };
        compute_diff(
            ctx,
            &container.snapshot_key,
            &snapshotter,
            engine.comparer(),
            opts.remove_top_layer,
            &diff_opts,
        )?
    };
    debug!("layer {} ({} bytes)", layer.digest(), layer.size());

    apply_changes(&mut config, &opts.changes);
    record_layer(&mut config, &layer, opts, &Utc::now().to_rfc3339())?;

    let config_desc = engine
        .content()
        .write_blob(MediaType::ImageConfig, &serde_json::to_vec(&config)?)
        .map_err(CoreError::wrap("write image config"))?;

    layers.push(layer);
    let manifest = image_manifest(config_desc.clone(), layers)?;
    let manifest_desc = engine
        .content()
        .write_blob(MediaType::ImageManifest, &serde_json::to_vec(&manifest)?)
        .map_err(CoreError::wrap("write image manifest"))?;

    engine
        .images(ctx)
        .put(&ImageRecord::new(opts.reference.to_string(), manifest_desc))
        .map_err(CoreError::wrap("create image"))?;

    let image_id = config_desc.blob_digest();
    info!("created image {} ({image_id})", opts.reference);
    Ok(image_id)
}

/// Resolve `req` to exactly one container and commit it as `raw_ref`,
/// writing the new image id to `out`.
pub fn commit_container(
    ctx: &Context,
    engine: &Engine,
    raw_ref: &str,
    req: &str,
    options: &CommitOptions,
    out: &mut dyn Write,
) -> Result<(), CoreError> {
    let reference = ImageReference::parse(raw_ref)?;
    let changes = parse_changes(&options.changes)?;
    for warning in &changes.warnings {
        warn!("{warning}");
    }

    let opts = CommitOpts {
        author: options.author.clone().unwrap_or_default(),
        message: options.message.clone().unwrap_or_default(),
        reference,
        pause: options.pause,
        changes,
        compression: options.compression,
        remove_top_layer: options.remove_top_layer,
        snapshotter: options.snapshotter.clone(),
    };

    let containers = engine.containers(ctx);
    let n = walk_containers(ctx, &containers, req, &mut |found| {
        if found.match_count > 1 {
            return Err(CoreError::AmbiguousReference(found.req.to_owned()));
        }
        let image_id = commit(ctx, engine, &found.container, &opts)?;
        writeln!(out, "{image_id}")?;
        Ok(())
    })?;
    if n == 0 {
        return Err(CoreError::NotFound(format!("container {req}")));
    }
    Ok(())
}
