//! Single-instance guard for the supervisor daemon
//!
//! Two supervisors reconciling the same desired-state document would fight
//! over the same tunnels, so `serve` claims a PID file first. Ownership is
//! the exclusive lock on `<pid_file>.lock`, held for the guard's lifetime;
//! the PID file itself only tells other processes who the holder is.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::fsutil;
use crate::lockfile::{self, FileLock};

/// Read the PID recorded in `path`
///
/// `Ok(None)` when the file does not exist; malformed content is an error.
pub fn read_pid_file(path: &Path) -> io::Result<Option<u32>> {
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Held PID file, removed when dropped
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
    pid: u32,
    _lock: FileLock,
}

impl PidFileGuard {
    /// Claim `path` for the current process
    ///
    /// Fails with `AlreadyExists` while another guard holds the lock. A PID
    /// file left by a crashed supervisor is unlocked and gets replaced.
    pub fn acquire(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let pid = std::process::id();

        let lock = match FileLock::try_exclusive(lockfile::sidecar(&path))? {
            Some(lock) => lock,
            None => {
                let holder = match read_pid_file(&path) {
                    Ok(Some(holder)) => format!("PID {}", holder),
                    _ => "unknown PID".to_string(),
                };
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("supervisor already running with {}", holder),
                ));
            }
        };

        match read_pid_file(&path) {
            Ok(Some(stale)) => {
                tracing::debug!("Replacing stale PID file {:?} (PID {})", path, stale);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Ignoring unreadable PID file {:?}: {}", path, e);
            }
        }

        fsutil::write_atomic(&path, format!("{}\n", pid).as_bytes())?;
        Ok(Self {
            path,
            pid,
            _lock: lock,
        })
    }

    /// PID recorded in the file
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Location of the PID file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        // Runs before the lock field is released
        if let Err(e) = fsutil::remove_if_exists(&self.path) {
            tracing::warn!("Failed to remove PID file {:?}: {}", self.path, e);
        }
    }
}
