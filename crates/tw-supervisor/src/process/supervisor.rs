//! Tunnel process lifecycle
//!
//! The supervisor launches one detached tunnel process per name and answers
//! liveness questions from the process table. Runtime handles live in a
//! per-name table. Holding a name's slot is the critical section for every
//! read-check-act sequence on that tunnel: the slot mutex orders tasks in
//! this process and the advisory lock on `<config_dir>/.<name>.lock` orders
//! the daemon against admin commands running in other processes.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use tw_core::config::WardenConfig;
use tw_core::error::TunnelError;
use tw_core::ingress;
use tw_core::lockfile::FileLock;
use tw_core::time::current_time_millis;
use tw_core::types::TunnelName;

use crate::locks;

use super::logs;
use super::signal;
use super::table::{matches_tunnel, ProcessTable, SystemProcessTable};

/// Poll interval while waiting for stopped processes to exit
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wait after SIGKILL before giving up on a process
const KILL_WAIT: Duration = Duration::from_secs(1);

/// A process started by this supervisor instance
#[derive(Debug)]
pub struct RuntimeHandle {
    pub pid: u32,
    /// Launch time in Unix milliseconds
    pub started_at: u64,
    pub log_path: PathBuf,
    child: Child,
}

/// Per-name runtime slot
#[derive(Debug, Default)]
pub struct Slot {
    handle: Option<RuntimeHandle>,
}

impl Slot {
    /// Handle of the process this instance launched, if any
    pub fn handle(&self) -> Option<&RuntimeHandle> {
        self.handle.as_ref()
    }

    /// Drop the handle if its process has exited, collecting its exit status
    fn reap(&mut self, name: &str) {
        let exited = match self.handle.as_mut().map(|h| h.child.try_wait()) {
            Some(Ok(Some(status))) => {
                tracing::info!("Tunnel {} process exited with {}", name, status);
                true
            }
            Some(Ok(None)) | None => false,
            Some(Err(e)) => {
                tracing::warn!("Failed to check tunnel {} process: {}", name, e);
                true
            }
        };
        if exited {
            self.handle = None;
        }
    }

    /// Kill and collect the held child, if it is still alive
    fn discard(&mut self, name: &str) {
        if let Some(mut handle) = self.handle.take() {
            if let Ok(None) = handle.child.try_wait() {
                tracing::debug!("Killing tunnel {} child {}", name, handle.pid);
                let _ = handle.child.kill();
                let _ = handle.child.wait();
            }
        }
    }
}

/// Exclusive access to one tunnel's slot, within and across processes
pub struct SlotGuard {
    slot: OwnedMutexGuard<Slot>,
    _file: FileLock,
}

impl Deref for SlotGuard {
    type Target = Slot;

    fn deref(&self) -> &Slot {
        &self.slot
    }
}

impl DerefMut for SlotGuard {
    fn deref_mut(&mut self) -> &mut Slot {
        &mut self.slot
    }
}

/// Result of a start request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Matching processes were already running; nothing was launched
    AlreadyRunning { pids: Vec<u32> },
    /// A new process was launched and observed running
    Started { pid: u32 },
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// No matching processes existed
    NotRunning,
    /// Matching processes were stopped
    Stopped {
        terminated: Vec<u32>,
        killed: Vec<u32>,
    },
}

/// Manages tunnel processes on this host
pub struct ProcessSupervisor {
    config: WardenConfig,
    table: Arc<dyn ProcessTable>,
    slots: DashMap<String, Arc<Mutex<Slot>>>,
}

impl ProcessSupervisor {
    /// Supervisor reading the host process table
    pub fn new(config: WardenConfig) -> Self {
        Self::with_table(config, Arc::new(SystemProcessTable))
    }

    /// Supervisor reading a custom process table
    pub fn with_table(config: WardenConfig, table: Arc<dyn ProcessTable>) -> Self {
        Self {
            config,
            table,
            slots: DashMap::new(),
        }
    }

    /// Acquire the per-name critical section
    ///
    /// Waits for the in-process slot first, then for the tunnel's lock file.
    pub async fn lock(&self, name: &str) -> Result<SlotGuard, TunnelError> {
        TunnelName::new(name)?;
        let slot = Arc::clone(self.slots.entry(name.to_string()).or_default().value());
        let slot = slot.lock_owned().await;
        let file = locks::exclusive(self.config.tunnel_lock_path(name)).await?;
        Ok(SlotGuard { slot, _file: file })
    }

    /// PIDs of processes serving `name`
    ///
    /// An unreadable process table yields no PIDs: the tunnel is treated as
    /// not running.
    pub async fn find_processes(&self, name: &str) -> Vec<u32> {
        self.find_many(&[name.to_string()])
            .await
            .remove(name)
            .unwrap_or_default()
    }

    /// PIDs for several tunnels from a single process table snapshot
    pub async fn find_many(&self, names: &[String]) -> HashMap<String, Vec<u32>> {
        let table = Arc::clone(&self.table);
        let snapshot = match tokio::task::spawn_blocking(move || table.snapshot()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Process table scan failed: {}", e);
                Vec::new()
            }
        };

        names
            .iter()
            .map(|name| {
                let mut pids: Vec<u32> = snapshot
                    .iter()
                    .filter(|p| matches_tunnel(&p.cmd, &self.config.binary, name))
                    .map(|p| p.pid)
                    .collect();
                pids.sort_unstable();
                (name.clone(), pids)
            })
            .collect()
    }

    /// Whether any process serves `name`
    pub async fn is_running(&self, name: &str) -> bool {
        !self.find_processes(name).await.is_empty()
    }

    /// Start a tunnel; a running tunnel is left alone
    pub async fn start(&self, name: &str) -> Result<StartOutcome, TunnelError> {
        let mut slot = self.lock(name).await?;
        self.start_locked(name, &mut slot).await
    }

    /// Start a tunnel while holding its slot
    pub async fn start_locked(
        &self,
        name: &str,
        slot: &mut Slot,
    ) -> Result<StartOutcome, TunnelError> {
        slot.reap(name);

        let pids = self.find_processes(name).await;
        if !pids.is_empty() {
            tracing::debug!("Tunnel {} already running ({:?})", name, pids);
            return Ok(StartOutcome::AlreadyRunning { pids });
        }

        let config_path = self.config.tunnel_config_path(name);
        let document = ingress::read_config(&config_path)?;
        if !document.credentials_file.exists() {
            return Err(TunnelError::CredentialsNotFound(document.credentials_file));
        }

        let log_path = self.config.log_path(name);
        let mut log = logs::open_log(&log_path)?;
        logs::write_start_marker(&mut log, name)?;
        let log_err = log.try_clone()?;

        let mut command = Command::new(&self.config.binary);
        command
            .arg("tunnel")
            .arg("--config")
            .arg(&config_path)
            .arg("run")
            .arg(&document.tunnel)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        detach(&mut command);

        tracing::info!(
            "Starting {} for tunnel {} (id: {})",
            self.config.binary,
            name,
            document.tunnel
        );
        let child = command.spawn().map_err(|source| TunnelError::SpawnFailure {
            binary: self.config.binary.clone(),
            source,
        })?;

        let pid = child.id();
        slot.handle = Some(RuntimeHandle {
            pid,
            started_at: current_time_millis(),
            log_path: log_path.clone(),
            child,
        });

        tokio::time::sleep(self.config.settle_delay).await;

        if self.is_running(name).await {
            tracing::info!("Tunnel {} started (PID: {})", name, pid);
            return Ok(StartOutcome::Started { pid });
        }

        // Nothing may be left behind when verification fails
        slot.reap(name);
        slot.discard(name);
        let log_tail = logs::tail(&log_path, self.config.log_tail_lines).unwrap_or_default();
        Err(TunnelError::StartVerificationFailed {
            name: name.to_string(),
            log_tail,
        })
    }

    /// Stop a tunnel; stopping a stopped tunnel succeeds
    pub async fn stop(&self, name: &str) -> Result<StopOutcome, TunnelError> {
        let mut slot = self.lock(name).await?;
        self.stop_locked(name, &mut slot).await
    }

    /// Stop a tunnel while holding its slot
    pub async fn stop_locked(
        &self,
        name: &str,
        slot: &mut Slot,
    ) -> Result<StopOutcome, TunnelError> {
        slot.reap(name);

        let terminated = self.find_processes(name).await;
        if terminated.is_empty() {
            slot.discard(name);
            tracing::debug!("Tunnel {} is not running", name);
            return Ok(StopOutcome::NotRunning);
        }

        tracing::info!("Stopping tunnel {} ({:?})", name, terminated);
        for pid in &terminated {
            if let Err(e) = signal::terminate(*pid) {
                tracing::warn!("Could not send SIGTERM to {}: {}", pid, e);
            }
        }

        let survivors = self
            .wait_for_exit(name, slot, self.config.stop_grace)
            .await;

        let mut killed = Vec::new();
        if !survivors.is_empty() {
            tracing::warn!(
                "Tunnel {} did not exit within {:?}, killing {:?}",
                name,
                self.config.stop_grace,
                survivors
            );
            for pid in survivors {
                match signal::force_kill(pid) {
                    Ok(()) => killed.push(pid),
                    Err(e) => tracing::warn!("Could not kill {}: {}", pid, e),
                }
            }
            let remaining = self.wait_for_exit(name, slot, KILL_WAIT).await;
            if !remaining.is_empty() {
                tracing::error!("Tunnel {} processes survived SIGKILL: {:?}", name, remaining);
            }
        }

        slot.discard(name);
        tracing::info!("Tunnel {} stopped", name);
        Ok(StopOutcome::Stopped { terminated, killed })
    }

    /// Poll until no process serves `name` or `limit` elapses; returns survivors
    async fn wait_for_exit(&self, name: &str, slot: &mut Slot, limit: Duration) -> Vec<u32> {
        let deadline = Instant::now() + limit;
        loop {
            slot.reap(name);
            let remaining = self.find_processes(name).await;
            if remaining.is_empty() || Instant::now() >= deadline {
                return remaining;
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }

    /// PID and start time of the process this instance launched, if known
    ///
    /// Never waits: a slot busy with a start or stop reports nothing.
    pub fn runtime(&self, name: &str) -> Option<(u32, u64)> {
        let slot = self.slots.get(name).map(|s| Arc::clone(s.value()))?;
        let guard = slot.try_lock().ok()?;
        guard.handle().map(|h| (h.pid, h.started_at))
    }

    /// Append-only log of a tunnel's process output
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.config.log_path(name)
    }

    /// Last `lines` lines of a tunnel's log
    pub fn log_tail(&self, name: &str, lines: usize) -> std::io::Result<String> {
        logs::tail(&self.config.log_path(name), lines)
    }
}

/// Put the child in its own process group so it outlives the supervisor
/// and does not receive signals aimed at the supervisor's group
#[cfg(unix)]
fn detach(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn detach(_command: &mut Command) {}
