//! Core error types for tunnel-warden

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the tunnel-warden ecosystem
#[derive(Error, Debug)]
pub enum WardenError {
    /// Tunnel lifecycle error
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Desired-state store error
    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    /// Daemon configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while generating, reading or running a tunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    /// Tunnel name contains characters outside `[A-Za-z0-9_-]`
    #[error("Invalid tunnel name: {0:?} (use letters, numbers, hyphens and underscores)")]
    InvalidTunnelName(String),

    /// Hostname is not a valid DNS name
    #[error("Invalid hostname: {0:?}")]
    InvalidHostname(String),

    /// Port outside 1..=65535 or not a number
    #[error("Invalid port: {0:?} (must be between 1 and 65535)")]
    InvalidPort(String),

    /// Service address could not be understood
    #[error("Invalid service address: {0:?}")]
    InvalidService(String),

    /// Ingress list violates the catch-all rule invariant
    #[error("Invalid ingress rules: {0}")]
    InvalidIngress(String),

    /// The tunnel's configuration document does not exist
    #[error("Config file not found: {0}")]
    ConfigNotFound(PathBuf),

    /// The credentials artifact referenced by the configuration does not exist
    #[error("Credentials file not found: {0}")]
    CredentialsNotFound(PathBuf),

    /// The configuration document exists but cannot be parsed
    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The OS refused to launch the tunnel binary
    #[error("Failed to spawn {binary}: {source}")]
    SpawnFailure {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The process was launched but not observed running after the settle delay
    #[error("Tunnel {name} failed to start or exited immediately\n--- log tail ---\n{log_tail}")]
    StartVerificationFailed { name: String, log_tail: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Whether the error was caused by bad input, rejected before any side effect
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            TunnelError::InvalidTunnelName(_)
                | TunnelError::InvalidHostname(_)
                | TunnelError::InvalidPort(_)
                | TunnelError::InvalidService(_)
                | TunnelError::InvalidIngress(_)
        )
    }
}

/// Desired-state store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// The state document exists but is unreadable
    #[error("State store corrupt at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// Serializing the state document failed
    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
