//! Supervisor daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Configuration for the tunnel supervisor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Directory holding per-tunnel config documents and credentials
    pub config_dir: PathBuf,

    /// Desired-state document
    pub state_file: PathBuf,

    /// Directory receiving per-tunnel process logs
    pub log_dir: PathBuf,

    /// Tunnel binary, either a bare name resolved through `PATH` or a path
    pub binary: String,

    /// Interval between reconciliation sweeps
    #[serde(with = "duration_secs")]
    pub reconcile_interval: Duration,

    /// Wait after launching a process before trusting a liveness check
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,

    /// How long a stopped process gets to exit before it is killed
    #[serde(with = "duration_millis")]
    pub stop_grace: Duration,

    /// Log lines attached to a start verification failure
    pub log_tail_lines: usize,

    /// PID file guarding against two supervisors on one host
    pub pid_file: PathBuf,

    /// Backoff applied to tunnels that keep failing to start
    pub backoff: BackoffConfig,
}

impl Default for WardenConfig {
    fn default() -> Self {
        let config_dir = PathBuf::from("/etc/cloudflared");

        Self {
            state_file: config_dir.join("tunnel-state.json"),
            config_dir,
            log_dir: PathBuf::from("/var/log"),
            binary: "cloudflared".to_string(),
            reconcile_interval: Duration::from_secs(30),
            settle_delay: Duration::from_millis(2000),
            stop_grace: Duration::from_millis(5000),
            log_tail_lines: 20,
            backoff: BackoffConfig::default(),
            pid_file: super::default_config_dir().join("warden.pid"),
        }
    }
}

impl WardenConfig {
    /// Configuration rooted under a single directory, used for local setups and tests
    pub fn rooted_at(root: &Path) -> Self {
        let config_dir = root.join("tunnels");
        Self {
            state_file: config_dir.join("tunnel-state.json"),
            config_dir,
            log_dir: root.join("logs"),
            pid_file: root.join("warden.pid"),
            ..Self::default()
        }
    }

    /// Path of a tunnel's configuration document
    pub fn tunnel_config_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.yml", name))
    }

    /// Default credentials artifact for a tunnel
    pub fn credentials_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!("{}.json", name))
    }

    /// Advisory lock serializing changes to one tunnel across processes
    pub fn tunnel_lock_path(&self, name: &str) -> PathBuf {
        self.config_dir.join(format!(".{}.lock", name))
    }

    /// Append-only process log for a tunnel
    pub fn log_path(&self, name: &str) -> PathBuf {
        self.log_dir.join(format!("cloudflared-{}.log", name))
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_secs")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_secs")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(30),
            max: Duration::from_secs(600),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}
