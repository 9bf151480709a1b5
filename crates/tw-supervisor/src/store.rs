//! Desired-state store
//!
//! A single JSON document maps tunnel name to whether its process should be
//! running. Every mutation is a read-modify-write of the whole document while
//! holding both an in-process mutex and an exclusive advisory lock, so the
//! daemon and concurrent admin commands never lose each other's updates. The
//! document itself is always replaced atomically.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use tw_core::error::StoreError;
use tw_core::fsutil;
use tw_core::lockfile;
use tw_core::time::current_time_millis;

use crate::locks;

/// Full desired-state document
pub type StateMap = BTreeMap<String, DesiredState>;

/// Administrator intent for one tunnel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DesiredState {
    /// Whether the tunnel's process should be running
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_enabled: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disabled: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<u64>,

    /// Opaque snapshot of the tunnel configuration at enable time
    #[serde(default)]
    pub config: serde_json::Value,

    #[serde(default)]
    pub auto_restart: bool,
}

/// Durable desired state, one writer at a time
///
/// Writers in this process queue on an async mutex; writers in other
/// processes queue on the exclusive lock of `<document>.lock`.
pub struct DesiredStateStore {
    path: PathBuf,
    lock_path: PathBuf,
    lock: Mutex<()>,
}

impl DesiredStateStore {
    /// Store backed by the document at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            lock_path: lockfile::sidecar(&path),
            path,
            lock: Mutex::new(()),
        }
    }

    /// Location of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the directory and an empty document if missing
    ///
    /// A corrupt document is preserved and replaced with empty state.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let _file = locks::exclusive(self.lock_path.clone()).await?;

        if !self.path.exists() {
            save_document(&self.path, &StateMap::new())?;
            tracing::info!("Initialized tunnel state file {:?}", self.path);
            return Ok(());
        }
        self.load_for_update()?;
        Ok(())
    }

    /// Mark a tunnel as wanted; idempotent apart from timestamps
    pub async fn enable(
        &self,
        name: &str,
        snapshot: serde_json::Value,
    ) -> Result<DesiredState, StoreError> {
        let state = self
            .mutate(|map| {
                let now = current_time_millis();
                let entry = map.entry(name.to_string()).or_insert_with(|| DesiredState {
                    enabled: true,
                    last_enabled: None,
                    last_disabled: None,
                    last_updated: None,
                    config: serde_json::Value::Null,
                    auto_restart: true,
                });
                entry.enabled = true;
                entry.auto_restart = true;
                entry.last_enabled = Some(now);
                entry.config = snapshot;
                (entry.clone(), true)
            })
            .await?;
        tracing::info!("Tunnel {} marked as enabled", name);
        Ok(state)
    }

    /// Mark a tunnel as not wanted; unknown names are a no-op
    pub async fn disable(&self, name: &str) -> Result<bool, StoreError> {
        let found = self
            .mutate(|map| match map.get_mut(name) {
                Some(entry) => {
                    entry.enabled = false;
                    entry.last_disabled = Some(current_time_millis());
                    (true, true)
                }
                None => (false, false),
            })
            .await?;
        if found {
            tracing::info!("Tunnel {} marked as disabled", name);
        }
        Ok(found)
    }

    /// Forget a tunnel; unknown names are a no-op
    pub async fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let found = self
            .mutate(|map| {
                let found = map.remove(name).is_some();
                (found, found)
            })
            .await?;
        if found {
            tracing::info!("Tunnel {} removed from state", name);
        }
        Ok(found)
    }

    /// Merge `snapshot` into the stored config snapshot
    pub async fn update_config(
        &self,
        name: &str,
        snapshot: serde_json::Value,
    ) -> Result<bool, StoreError> {
        self.mutate(|map| match map.get_mut(name) {
            Some(entry) => {
                merge_snapshot(&mut entry.config, snapshot);
                entry.last_updated = Some(current_time_millis());
                (true, true)
            }
            None => (false, false),
        })
        .await
    }

    /// Keep only entries matching `keep`; returns the removed names
    pub async fn retain<F>(&self, mut keep: F) -> Result<Vec<String>, StoreError>
    where
        F: FnMut(&str, &DesiredState) -> bool,
    {
        self.mutate(|map| {
            let removed: Vec<String> = map
                .iter()
                .filter(|(name, state)| !keep(name, state))
                .map(|(name, _)| name.clone())
                .collect();
            for name in &removed {
                map.remove(name);
            }
            let changed = !removed.is_empty();
            (removed, changed)
        })
        .await
    }

    /// Whether a tunnel is currently wanted
    pub async fn is_enabled(&self, name: &str) -> bool {
        self.get(name).await.map(|s| s.enabled).unwrap_or(false)
    }

    /// Desired state of one tunnel
    pub async fn get(&self, name: &str) -> Option<DesiredState> {
        self.get_all().await.remove(name)
    }

    /// Every enabled tunnel with its state, sorted by name
    pub async fn list_enabled(&self) -> Vec<(String, DesiredState)> {
        self.get_all()
            .await
            .into_iter()
            .filter(|(_, state)| state.enabled)
            .collect()
    }

    /// The whole document
    ///
    /// Unreadable or corrupt state reads as empty; only a mutation replaces it.
    pub async fn get_all(&self) -> StateMap {
        let _guard = self.lock.lock().await;
        let _file = match locks::shared(self.lock_path.clone()).await {
            Ok(file) => Some(file),
            Err(e) => {
                // Documents are replaced atomically, so an unlocked read is still whole
                tracing::debug!("Reading tunnel state without lock {:?}: {}", self.lock_path, e);
                None
            }
        };

        match load_document(&self.path) {
            Ok(map) => map,
            Err(e) => {
                tracing::error!(
                    "Failed to read tunnel state {:?}: {}; continuing with empty state",
                    self.path,
                    e
                );
                StateMap::new()
            }
        }
    }

    async fn mutate<R, F>(&self, edit: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut StateMap) -> (R, bool),
    {
        let _guard = self.lock.lock().await;
        let _file = locks::exclusive(self.lock_path.clone()).await?;

        let mut map = self.load_for_update()?;
        let (result, changed) = edit(&mut map);
        if changed {
            save_document(&self.path, &map)?;
        }
        Ok(result)
    }

    /// Load the document under the exclusive lock
    ///
    /// Corrupt bytes are copied aside and the document is reset to empty
    /// state before anything is written over it. Any other read failure is
    /// returned, leaving the document untouched.
    fn load_for_update(&self) -> Result<StateMap, StoreError> {
        match load_document(&self.path) {
            Ok(map) => Ok(map),
            Err(StoreError::Corrupt { path, reason }) => {
                tracing::error!(
                    "Tunnel state {:?} is corrupt ({}); continuing with empty state",
                    path,
                    reason
                );
                let backup = quarantine(&path)?;
                tracing::warn!("Corrupt tunnel state preserved at {:?}", backup);
                let empty = StateMap::new();
                save_document(&self.path, &empty)?;
                Ok(empty)
            }
            Err(e) => Err(e),
        }
    }
}

/// Read and parse the document; a missing or blank file is empty state
///
/// Content that is not UTF-8 JSON of the expected shape is `Corrupt`.
pub fn load_document(path: &Path) -> Result<StateMap, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StateMap::new()),
        Err(e) => return Err(e.into()),
    };
    let corrupt = |reason: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let content = std::str::from_utf8(&bytes).map_err(|e| corrupt(e.to_string()))?;
    if content.trim().is_empty() {
        return Ok(StateMap::new());
    }
    serde_json::from_str(content).map_err(|e| corrupt(e.to_string()))
}

fn save_document(path: &Path, map: &StateMap) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(map)?;
    fsutil::write_atomic(path, &json)?;
    tracing::debug!("Tunnel state saved ({} entries)", map.len());
    Ok(())
}

/// Copy a corrupt document to `<document>.corrupt.<millis>`
fn quarantine(path: &Path) -> io::Result<PathBuf> {
    let mut target = path.as_os_str().to_owned();
    target.push(format!(".corrupt.{}", current_time_millis()));
    let target = PathBuf::from(target);
    fs::copy(path, &target)?;
    Ok(target)
}

fn merge_snapshot(current: &mut serde_json::Value, update: serde_json::Value) {
    match (current, update) {
        (serde_json::Value::Object(current), serde_json::Value::Object(update)) => {
            current.extend(update);
        }
        (current, update) => *current = update,
    }
}
