//! Fleet administration and status
//!
//! The `Fleet` ties the desired-state store to the process supervisor. Every
//! operation that changes a tunnel runs inside that tunnel's slot lock, so
//! an administrator's intent and the reconciler's check-then-start can never
//! interleave. The store lock is only ever taken while a slot is held, never
//! the other way round.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use tw_core::config::WardenConfig;
use tw_core::error::{StoreError, WardenError};
use tw_core::ingress::{self, TunnelConfig, TunnelSpec};
use tw_core::types::{TunnelName, TunnelPhase};

use crate::process::{ProcessSupervisor, ProcessTable, StartOutcome, StopOutcome};
use crate::store::DesiredStateStore;

/// What the reconciler did for one tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Convergence {
    /// Disabled or forgotten by the time the slot was acquired
    NotWanted,
    /// Already running
    AlreadyRunning,
    /// Restarted
    Started { pid: u32 },
}

/// Merged desired and observed state of one tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub name: String,
    pub enabled: bool,
    pub running: bool,
    pub pids: Vec<u32>,
    pub log_path: String,
    pub has_config: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    pub phase: TunnelPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

/// Desired state, processes and configuration documents of one host
pub struct Fleet {
    config: WardenConfig,
    store: DesiredStateStore,
    supervisor: ProcessSupervisor,
}

impl Fleet {
    pub fn new(config: WardenConfig) -> Self {
        let supervisor = ProcessSupervisor::new(config.clone());
        Self::from_parts(config, supervisor)
    }

    /// Fleet reading a custom process table
    pub fn with_table(config: WardenConfig, table: Arc<dyn ProcessTable>) -> Self {
        let supervisor = ProcessSupervisor::with_table(config.clone(), table);
        Self::from_parts(config, supervisor)
    }

    fn from_parts(config: WardenConfig, supervisor: ProcessSupervisor) -> Self {
        Self {
            store: DesiredStateStore::new(config.state_file.clone()),
            config,
            supervisor,
        }
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn store(&self) -> &DesiredStateStore {
        &self.store
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Prepare the store and drop orphaned entries; returns the number dropped
    pub async fn initialize(&self) -> Result<usize, StoreError> {
        self.store.initialize().await?;
        self.cleanup_orphans().await
    }

    /// Forget every desired state whose configuration document is gone
    pub async fn cleanup_orphans(&self) -> Result<usize, StoreError> {
        let removed = self
            .store
            .retain(|name, _| ingress::config_exists(&self.config.tunnel_config_path(name)))
            .await?;

        for name in &removed {
            tracing::info!("Removed orphaned tunnel state: {}", name);
        }
        if !removed.is_empty() {
            tracing::info!("Cleaned up {} orphaned tunnel state entries", removed.len());
        }
        Ok(removed.len())
    }

    /// Write a new tunnel's configuration document, optionally enabling it
    ///
    /// Input is validated before anything touches the filesystem.
    pub async fn create(
        &self,
        spec: &TunnelSpec,
        enable: bool,
    ) -> Result<Option<StartOutcome>, WardenError> {
        let document = ingress::generate_config(spec, &self.config.config_dir)?;
        let name = spec.name.as_str();

        let mut slot = self.supervisor.lock(name).await?;
        ingress::write_config(&self.config.tunnel_config_path(name), &document)?;
        tracing::info!("Created tunnel {} ({})", name, spec.hostname);

        let snapshot = snapshot_of(&document)?;
        if !enable {
            self.store.update_config(name, snapshot).await?;
            return Ok(None);
        }

        self.store.enable(name, snapshot).await?;
        let outcome = self.supervisor.start_locked(name, &mut slot).await?;
        Ok(Some(outcome))
    }

    /// Record that a tunnel should run, then start it
    ///
    /// Intent is recorded even when the start fails, so reconciliation keeps
    /// retrying.
    pub async fn enable(&self, name: &str) -> Result<StartOutcome, WardenError> {
        TunnelName::new(name)?;
        let mut slot = self.supervisor.lock(name).await?;

        let document = ingress::read_config(&self.config.tunnel_config_path(name))?;
        self.store.enable(name, snapshot_of(&document)?).await?;
        Ok(self.supervisor.start_locked(name, &mut slot).await?)
    }

    /// Record that a tunnel should not run, then stop it
    pub async fn disable(&self, name: &str) -> Result<StopOutcome, WardenError> {
        TunnelName::new(name)?;
        let mut slot = self.supervisor.lock(name).await?;

        if !self.store.disable(name).await? {
            tracing::debug!("Tunnel {} has no desired state to disable", name);
        }
        Ok(self.supervisor.stop_locked(name, &mut slot).await?)
    }

    /// Start a tunnel without changing its desired state
    pub async fn start(&self, name: &str) -> Result<StartOutcome, WardenError> {
        TunnelName::new(name)?;
        Ok(self.supervisor.start(name).await?)
    }

    /// Stop a tunnel without changing its desired state
    ///
    /// An enabled tunnel stopped this way is restarted by the next sweep.
    pub async fn stop(&self, name: &str) -> Result<StopOutcome, WardenError> {
        TunnelName::new(name)?;
        Ok(self.supervisor.stop(name).await?)
    }

    /// Stop a tunnel, forget its desired state and remove its document
    pub async fn delete(&self, name: &str) -> Result<(), WardenError> {
        TunnelName::new(name)?;
        let mut slot = self.supervisor.lock(name).await?;

        // Intent goes first so a failed stop cannot be undone by a sweep
        self.store.disable(name).await?;
        self.supervisor.stop_locked(name, &mut slot).await?;
        self.store.remove(name).await?;
        ingress::remove_config(&self.config.tunnel_config_path(name))?;

        tracing::info!("Deleted tunnel {}", name);
        Ok(())
    }

    /// Start an enabled tunnel that is not running
    ///
    /// The enabled flag is re-read inside the slot, after any concurrent
    /// disable has finished.
    pub async fn ensure_running(&self, name: &str) -> Result<Convergence, WardenError> {
        let mut slot = self.supervisor.lock(name).await?;
        if !self.store.is_enabled(name).await {
            return Ok(Convergence::NotWanted);
        }

        match self.supervisor.start_locked(name, &mut slot).await? {
            StartOutcome::AlreadyRunning { .. } => Ok(Convergence::AlreadyRunning),
            StartOutcome::Started { pid } => Ok(Convergence::Started { pid }),
        }
    }

    /// Status of every tunnel that has desired state or a configuration document
    pub async fn status(&self) -> Vec<StatusRecord> {
        let desired = self.store.get_all().await;
        let configured = ingress::list_configured(&self.config.config_dir).unwrap_or_else(|e| {
            tracing::warn!("Cannot list {:?}: {}", self.config.config_dir, e);
            Vec::new()
        });

        let names: Vec<String> = desired
            .keys()
            .cloned()
            .chain(configured)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut running = self.supervisor.find_many(&names).await;

        names
            .into_iter()
            .map(|name| {
                let enabled = desired.get(&name).map(|s| s.enabled).unwrap_or(false);
                let pids = running.remove(&name).unwrap_or_default();
                self.record(name, enabled, pids)
            })
            .collect()
    }

    /// Status of one tunnel
    pub async fn status_of(&self, name: &str) -> Result<StatusRecord, WardenError> {
        TunnelName::new(name)?;
        let enabled = self.store.is_enabled(name).await;
        let pids = self.supervisor.find_processes(name).await;
        Ok(self.record(name.to_string(), enabled, pids))
    }

    fn record(&self, name: String, enabled: bool, pids: Vec<u32>) -> StatusRecord {
        let config_path = self.config.tunnel_config_path(&name);
        let has_config = ingress::config_exists(&config_path);
        let hostname = if has_config {
            ingress::read_config(&config_path)
                .ok()
                .and_then(|c| c.hostname().map(str::to_string))
        } else {
            None
        };
        let started_at = self
            .supervisor
            .runtime(&name)
            .filter(|(pid, _)| pids.contains(pid))
            .map(|(_, started_at)| started_at);
        let running = !pids.is_empty();

        StatusRecord {
            log_path: self.config.log_path(&name).display().to_string(),
            phase: TunnelPhase::derive(has_config, enabled, running),
            name,
            enabled,
            running,
            pids,
            has_config,
            started_at,
            hostname,
        }
    }
}

/// Desired-state snapshot of a configuration document
fn snapshot_of(document: &TunnelConfig) -> Result<serde_json::Value, StoreError> {
    Ok(serde_json::to_value(document)?)
}
