use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use sha2::{Digest as _, Sha256};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use strata_schema::{descriptor, Descriptor, Digest, MediaType};
use tempfile::NamedTempFile;
use tracing::debug;

/// Content-addressable blob store keyed by sha256 digest.
///
/// Blobs are stored as `blobs/sha256/<hex>`. Writes are atomic via
/// `NamedTempFile`, and reads verify integrity by recomputing the digest.
pub struct ContentStore {
    layout: StoreLayout,
}

impl ContentStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    fn blob_path(&self, digest: &Digest) -> Result<PathBuf, StoreError> {
        if !digest.is_valid() {
            return Err(StoreError::InvalidArgument(format!(
                "invalid digest {:?}",
                digest.as_str()
            )));
        }
        Ok(self.layout.blobs_dir().join(digest.encoded()))
    }

    /// Path of a stored blob.
    pub fn path(&self, digest: &Digest) -> Result<PathBuf, StoreError> {
        let path = self.blob_path(digest)?;
        if !path.exists() {
            return Err(StoreError::NotFound(format!("content {digest}")));
        }
        Ok(path)
    }

    /// Store data and return its digest. Existing blobs are left untouched.
    pub fn put(&self, data: &[u8]) -> Result<Digest, StoreError> {
        let mut writer = self.writer()?;
        writer.write_all(data)?;
        let (digest, _) = writer.commit()?;
        Ok(digest)
    }

    /// Store data and describe it with `media_type`.
    pub fn write_blob(
        &self,
        media_type: MediaType,
        data: &[u8],
    ) -> Result<Descriptor, StoreError> {
        let digest = self.put(data)?;
        Ok(descriptor(media_type, &digest, data.len() as u64)?)
    }

    /// Streaming writer for blobs too large to buffer.
    pub fn writer(&self) -> Result<ContentWriter, StoreError> {
        let dir = self.layout.blobs_dir();
        fs::create_dir_all(&dir)?;
        Ok(ContentWriter {
            tmp: NamedTempFile::new_in(&dir)?,
            dir,
            hasher: Sha256::new(),
            size: 0,
        })
    }

    /// Retrieve a blob, verifying integrity on read.
    pub fn get(&self, digest: &Digest) -> Result<Vec<u8>, StoreError> {
        let path = self.path(digest)?;
        let data = fs::read(&path)?;

        let actual = Digest::sha256(&data);
        if actual != *digest {
            return Err(StoreError::IntegrityFailure {
                name: path.display().to_string(),
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(data)
    }

    /// Read a blob and decode it as JSON.
    pub fn get_json<T: serde::de::DeserializeOwned>(&self, digest: &Digest) -> Result<T, StoreError> {
        let data = self.get(digest)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn exists(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_ok_and(|p| p.exists())
    }

    pub fn size(&self, digest: &Digest) -> Result<u64, StoreError> {
        Ok(fs::metadata(self.path(digest)?)?.len())
    }

    pub fn remove(&self, digest: &Digest) -> Result<(), StoreError> {
        let path = self.blob_path(digest)?;
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<Digest>, StoreError> {
        let dir = self.layout.blobs_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut digests = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    digests.push(Digest::new(format!("sha256:{name}")));
                }
            }
        }
        digests.sort();
        Ok(digests)
    }
}

/// In-progress blob write. Dropping it without [`commit`](Self::commit)
/// discards the data.
pub struct ContentWriter {
    tmp: NamedTempFile,
    dir: PathBuf,
    hasher: Sha256,
    size: u64,
}

impl ContentWriter {
    /// Bytes written so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Persist the blob under its digest and return `(digest, size)`.
    pub fn commit(self) -> Result<(Digest, u64), StoreError> {
        let digest = Digest::new(format!("sha256:{}", hex::encode(self.hasher.finalize())));
        let dest = self.dir.join(digest.encoded());
        if dest.exists() {
            debug!("content {digest} already present");
            return Ok((digest, self.size));
        }

        self.tmp.as_file().sync_all()?;
        self.tmp.persist(&dest).map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&self.dir)?;
        debug!("wrote content {digest} ({} bytes)", self.size);
        Ok((digest, self.size))
    }
}

impl Write for ContentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.tmp.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.size += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}
