//! Atomic file replacement
//!
//! Documents are staged in a temp file next to their destination and renamed
//! into place, so readers see either the old or the new content.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

/// Atomically replace `path` with `contents`, creating parent directories
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    write_atomic_with(path, contents, |staged, path| {
        staged.persist(path).map(drop).map_err(|e| e.error)
    })
}

/// Stage `contents` next to `path` and hand the staged file to `persist`
///
/// The destination is only ever touched by `persist`; a failed persist
/// drops the staged file, which deletes it.
fn write_atomic_with<F>(path: &Path, contents: &[u8], persist: F) -> io::Result<()>
where
    F: FnOnce(NamedTempFile, &Path) -> io::Result<()>,
{
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    // Same directory as the destination keeps the rename on one filesystem
    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(contents)?;
    staged.as_file().sync_all()?;

    persist(staged, path)
}

/// Remove a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("doc.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[test]
    fn test_write_replaces_wholesale_without_leftovers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.yml");
        write_atomic(&path, b"first version, long content").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1, "staging file must not be left behind");
    }

    #[test]
    fn test_failed_rename_keeps_previous_document() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("doc.yml");
        write_atomic(&target, b"previous").unwrap();

        let err = write_atomic_with(&target, b"next", |staged, path| {
            assert_eq!(path, target.as_path());
            assert_eq!(fs::read(staged.path()).unwrap(), b"next");
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "rename refused"))
        })
        .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
        assert_eq!(fs::read_to_string(&target).unwrap(), "previous");
        let entries = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1, "staging file must be cleaned up");
    }

    #[test]
    fn test_rename_onto_directory_fails_and_keeps_it() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("doc.yml");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("previous"), "kept").unwrap();

        assert!(write_atomic(&target, b"next").is_err());
        assert_eq!(fs::read_to_string(target.join("previous")).unwrap(), "kept");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.yml");
        assert!(!remove_if_exists(&path).unwrap());
        fs::write(&path, "x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!path.exists());
    }
}
