use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use strata_store::Context;
use tracing::debug;

/// Exclusive advisory lock over the whole store, held for the duration of a
/// mutating command.
pub struct StoreLock {
    lock_file: File,
}

impl StoreLock {
    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    /// Block until the lock is free, logging once if another process holds it.
    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let lock_file = Self::open(lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            debug!(path = %lock_path.display(), "store busy, waiting for lock");
            lock_file.lock_exclusive().map_err(|e| {
                CoreError::Io(std::io::Error::new(std::io::ErrorKind::WouldBlock, e))
            })?;
        }
        Ok(Self { lock_file })
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = Self::open(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Cancel `root` on the first Ctrl-C; exit on the second.
///
/// Cleanup that runs through [`run_isolated`](crate::run_isolated) still
/// completes after the first signal.
pub fn install_signal_handler(root: &Context) {
    let root = root.clone();
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        root.cancel();
        eprintln!("\ninterrupt received, cleaning up...");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("test.lock");
        {
            let _lock = StoreLock::acquire(&lock_path).unwrap();
            assert!(lock_path.exists());
        }
        assert!(StoreLock::try_acquire(&lock_path).unwrap().is_some());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("test.lock");
        let _lock = StoreLock::acquire(&lock_path).unwrap();
        assert!(StoreLock::try_acquire(&lock_path).unwrap().is_none());
    }

    #[test]
    fn lock_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("nested/store/.lock");
        let _lock = StoreLock::acquire(&lock_path).unwrap();
        assert!(lock_path.exists());
    }
}
