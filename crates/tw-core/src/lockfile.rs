//! Advisory file locks
//!
//! The daemon and every admin command are separate processes working on the
//! same documents and tunnels. They coordinate through `flock`-style locks on
//! small sidecar files that are never removed, so every process always locks
//! the same inode.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;

/// A held advisory lock, released when dropped
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the exclusive lock on `path` is held
    pub fn exclusive(path: impl Into<PathBuf>) -> io::Result<Self> {
        let (file, path) = open(path.into())?;
        file.lock_exclusive()?;
        Ok(Self { file, path })
    }

    /// Block until a shared lock on `path` is held
    pub fn shared(path: impl Into<PathBuf>) -> io::Result<Self> {
        let (file, path) = open(path.into())?;
        file.lock_shared()?;
        Ok(Self { file, path })
    }

    /// Take the exclusive lock if nobody holds it; `Ok(None)` when contended
    pub fn try_exclusive(path: impl Into<PathBuf>) -> io::Result<Option<Self>> {
        let (file, path) = open(path.into())?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// The lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release lock {:?}: {}", self.path, e);
        }
    }
}

fn open(path: PathBuf) -> io::Result<(File, PathBuf)> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&path)?;
    Ok((file, path))
}

/// Sidecar lock file guarding `path`
pub fn sidecar(path: &Path) -> PathBuf {
    let mut lock = path.as_os_str().to_owned();
    lock.push(".lock");
    PathBuf::from(lock)
}
