//! Diff comparer that walks two directory trees and writes an OCI layer tar.
//!
//! The emitted archive is deterministic:
//! - entries sorted by relative path, parents before children
//! - all timestamps set to 0 and ownership to 0:0
//! - permissions preserved from the upper tree
//!
//! Paths removed from the lower tree are recorded as `.wh.<name>` whiteout
//! entries; only the top-most removed path is whited out. Device nodes,
//! sockets and FIFOs are skipped with a warning.

use crate::diff::{Compression, DiffComparer, DiffOptions};
use crate::CoreError;
use flate2::write::GzEncoder;
use sha2::{Digest as _, Sha256};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use strata_schema::{descriptor, Descriptor, DescriptorExt, Digest};
use strata_store::{ContentStore, ContentWriter, Context, Mount, StoreError};
use tracing::{debug, warn};

const WHITEOUT_PREFIX: &str = ".wh.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeKind {
    Add,
    Modify,
    Delete,
}

pub struct WalkingComparer {
    content: ContentStore,
}

impl WalkingComparer {
    pub fn new(content: ContentStore) -> Self {
        Self { content }
    }
}

impl DiffComparer for WalkingComparer {
    fn compare(
        &self,
        ctx: &Context,
        lower: &[Mount],
        upper: &[Mount],
        opts: &DiffOptions,
    ) -> Result<Descriptor, CoreError> {
        let lower_root = bind_source(lower)?;
        let upper_root = bind_source(upper)?;

        let mut changes = Vec::new();
        walk_upper(ctx, &lower_root, &upper_root, Path::new(""), &mut changes)?;
        walk_lower(ctx, &lower_root, &upper_root, Path::new(""), &mut changes)?;
        debug!(
            "diff {} -> {}: {} changes",
            lower_root.display(),
            upper_root.display(),
            changes.len()
        );

        let writer = self
            .content
            .writer()
            .map_err(CoreError::wrap("open layer writer"))?;
        let encoder = LayerEncoder::new(opts.compression, writer)?;
        let mut ar = tar::Builder::new(DigestWriter::new(encoder));
        ar.follow_symlinks(false);

        for (rel, kind) in with_parents(&upper_root, changes) {
            check(ctx)?;
            if kind == ChangeKind::Delete {
                append_whiteout(&mut ar, &rel)?;
            } else {
                append_entry(&mut ar, &rel, &upper_root.join(&rel))?;
            }
        }

        let (encoder, diff_id) = ar.into_inner()?.finish();
        let (digest, size) = encoder
            .finish()?
            .commit()
            .map_err(CoreError::wrap("write layer"))?;

        let mut desc = descriptor(opts.media_type(), &digest, size)?;
        desc.set_uncompressed_digest(&diff_id);
        Ok(desc)
    }
}

fn check(ctx: &Context) -> Result<(), CoreError> {
    ctx.check()
        .map_err(|e| CoreError::wrap("compute diff")(StoreError::from(e)))
}

/// Root directory of a single bind mount.
fn bind_source(mounts: &[Mount]) -> Result<PathBuf, CoreError> {
    match mounts {
        [m] if m.kind == "bind" => Ok(m.source.clone()),
        [m] => Err(CoreError::Unsupported(format!("mount type {:?}", m.kind))),
        _ => Err(CoreError::Unsupported(format!(
            "{} mounts, expected exactly one bind mount",
            mounts.len()
        ))),
    }
}

fn sorted_entries(dir: &Path) -> io::Result<Vec<fs::DirEntry>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut entries = fs::read_dir(dir)?.collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(fs::DirEntry::file_name);
    Ok(entries)
}

/// Record added and modified paths of `upper` relative to `lower`.
fn walk_upper(
    ctx: &Context,
    lower_root: &Path,
    upper_root: &Path,
    rel: &Path,
    changes: &mut Vec<(PathBuf, ChangeKind)>,
) -> Result<(), CoreError> {
    for entry in sorted_entries(&upper_root.join(rel))? {
        check(ctx)?;
        let rel_path = rel.join(entry.file_name());
        let upper_meta = fs::symlink_metadata(entry.path())?;
        let lower_path = lower_root.join(&rel_path);

        match fs::symlink_metadata(&lower_path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                changes.push((rel_path.clone(), ChangeKind::Add));
            }
            Err(e) => return Err(e.into()),
            Ok(lower_meta) => {
                if !same_entry(&lower_path, &lower_meta, &entry.path(), &upper_meta)? {
                    changes.push((rel_path.clone(), ChangeKind::Modify));
                }
            }
        }

        if upper_meta.is_dir() {
            walk_upper(ctx, lower_root, upper_root, &rel_path, changes)?;
        }
    }
    Ok(())
}

/// Record paths present in `lower` but gone from `upper`. Descendants of a
/// removed directory are not listed.
fn walk_lower(
    ctx: &Context,
    lower_root: &Path,
    upper_root: &Path,
    rel: &Path,
    changes: &mut Vec<(PathBuf, ChangeKind)>,
) -> Result<(), CoreError> {
    for entry in sorted_entries(&lower_root.join(rel))? {
        check(ctx)?;
        let rel_path = rel.join(entry.file_name());
        match fs::symlink_metadata(upper_root.join(&rel_path)) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                changes.push((rel_path, ChangeKind::Delete));
            }
            Err(e) => return Err(e.into()),
            Ok(upper_meta) => {
                let lower_is_dir = entry.file_type()?.is_dir();
                if lower_is_dir && upper_meta.is_dir() {
                    walk_lower(ctx, lower_root, upper_root, &rel_path, changes)?;
                }
            }
        }
    }
    Ok(())
}

fn same_entry(
    lower: &Path,
    lower_meta: &fs::Metadata,
    upper: &Path,
    upper_meta: &fs::Metadata,
) -> io::Result<bool> {
    let (lt, ut) = (lower_meta.file_type(), upper_meta.file_type());
    if lt.is_dir() != ut.is_dir()
        || lt.is_symlink() != ut.is_symlink()
        || lt.is_file() != ut.is_file()
    {
        return Ok(false);
    }
    if lower_meta.permissions().mode() != upper_meta.permissions().mode() {
        return Ok(false);
    }
    if ut.is_symlink() {
        return Ok(fs::read_link(lower)? == fs::read_link(upper)?);
    }
    if ut.is_file() {
        if lower_meta.len() != upper_meta.len() {
            return Ok(false);
        }
        return same_content(lower, upper);
    }
    Ok(true)
}

fn same_content(a: &Path, b: &Path) -> io::Result<bool> {
    let mut ra = BufReader::new(File::open(a)?);
    let mut rb = BufReader::new(File::open(b)?);
    let mut ba = [0u8; 8192];
    let mut bb = [0u8; 8192];
    loop {
        let n = ra.read(&mut ba)?;
        if n == 0 {
            return Ok(rb.read(&mut bb[..1])? == 0);
        }
        rb.read_exact(&mut bb[..n])?;
        if ba[..n] != bb[..n] {
            return Ok(false);
        }
    }
}

/// Sort changes and add every ancestor directory of an emitted path, so that
/// extracting the layer recreates parents with their upper permissions.
fn with_parents(
    upper_root: &Path,
    changes: Vec<(PathBuf, ChangeKind)>,
) -> Vec<(PathBuf, ChangeKind)> {
    let emitted: BTreeSet<PathBuf> = changes.iter().map(|(p, _)| p.clone()).collect();
    let mut out: Vec<(PathBuf, ChangeKind)> = changes;
    let mut parents = BTreeSet::new();
    for (path, _) in &out {
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            if !emitted.contains(ancestor) && upper_root.join(ancestor).is_dir() {
                parents.insert(ancestor.to_path_buf());
            }
        }
    }
    out.extend(parents.into_iter().map(|p| (p, ChangeKind::Modify)));
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

fn make_header(meta: &fs::Metadata, entry_type: tar::EntryType) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(meta.permissions().mode() & 0o7777);
    header
}

fn append_entry<W: Write>(
    ar: &mut tar::Builder<W>,
    rel: &Path,
    full: &Path,
) -> Result<(), CoreError> {
    let meta = fs::symlink_metadata(full)?;
    let ft = meta.file_type();
    if ft.is_file() {
        let mut header = make_header(&meta, tar::EntryType::Regular);
        header.set_size(meta.len());
        header.set_cksum();
        ar.append_data(&mut header, rel, File::open(full)?)?;
    } else if ft.is_dir() {
        let mut header = make_header(&meta, tar::EntryType::Directory);
        header.set_size(0);
        header.set_cksum();
        ar.append_data(&mut header, rel, io::empty())?;
    } else if ft.is_symlink() {
        let target = fs::read_link(full)?;
        let mut header = make_header(&meta, tar::EntryType::Symlink);
        header.set_size(0);
        header.set_cksum();
        ar.append_link(&mut header, rel, &target)?;
    } else {
        warn!("skipping unsupported file type: {}", rel.display());
    }
    Ok(())
}

fn append_whiteout<W: Write>(ar: &mut tar::Builder<W>, rel: &Path) -> Result<(), CoreError> {
    let name = rel
        .file_name()
        .ok_or_else(|| CoreError::Unsupported(format!("whiteout for {}", rel.display())))?;
    let whiteout = rel.with_file_name(format!("{WHITEOUT_PREFIX}{}", name.to_string_lossy()));
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(0o644);
    header.set_size(0);
    header.set_cksum();
    ar.append_data(&mut header, &whiteout, io::empty())?;
    Ok(())
}

/// Compression stage between the tar stream and the content writer.
enum LayerEncoder {
    Plain(ContentWriter),
    Gzip(GzEncoder<ContentWriter>),
    Zstd(zstd::Encoder<'static, ContentWriter>),
}

impl LayerEncoder {
    fn new(compression: Compression, writer: ContentWriter) -> io::Result<Self> {
        Ok(match compression {
            Compression::Uncompressed => LayerEncoder::Plain(writer),
            Compression::Gzip => {
                LayerEncoder::Gzip(GzEncoder::new(writer, flate2::Compression::default()))
            }
            Compression::Zstd => LayerEncoder::Zstd(zstd::Encoder::new(writer, 0)?),
        })
    }

    fn finish(self) -> io::Result<ContentWriter> {
        match self {
            LayerEncoder::Plain(w) => Ok(w),
            LayerEncoder::Gzip(e) => e.finish(),
            LayerEncoder::Zstd(e) => e.finish(),
        }
    }
}

impl Write for LayerEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            LayerEncoder::Plain(w) => w.write(buf),
            LayerEncoder::Gzip(e) => e.write(buf),
            LayerEncoder::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            LayerEncoder::Plain(w) => w.flush(),
            LayerEncoder::Gzip(e) => e.flush(),
            LayerEncoder::Zstd(e) => e.flush(),
        }
    }
}

/// Hashes the uncompressed tar stream to produce the layer's diff id.
struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> DigestWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> (W, Digest) {
        let digest = Digest::new(format!("sha256:{}", hex::encode(self.hasher.finalize())));
        (self.inner, digest)
    }
}

impl<W: Write> Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
