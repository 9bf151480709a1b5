//! Advisory file locks acquired off the async runtime

use std::io;
use std::path::PathBuf;

use tw_core::lockfile::FileLock;

/// Wait for the exclusive lock on `path` on a blocking thread
pub(crate) async fn exclusive(path: PathBuf) -> io::Result<FileLock> {
    on_blocking_thread(move || FileLock::exclusive(path)).await
}

/// Wait for a shared lock on `path` on a blocking thread
pub(crate) async fn shared(path: PathBuf) -> io::Result<FileLock> {
    on_blocking_thread(move || FileLock::shared(path)).await
}

async fn on_blocking_thread<F>(acquire: F) -> io::Result<FileLock>
where
    F: FnOnce() -> io::Result<FileLock> + Send + 'static,
{
    tokio::task::spawn_blocking(acquire)
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
