//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TunnelError;

/// Validated tunnel name
///
/// Names become file names (`<name>.yml`, `cloudflared-<name>.log`) and
/// process arguments, so only `[A-Za-z0-9_-]` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TunnelName(String);

impl TunnelName {
    /// Validate and wrap a tunnel name
    pub fn new(name: impl Into<String>) -> Result<Self, TunnelError> {
        let name = name.into();
        if is_valid_tunnel_name(&name) {
            Ok(Self(name))
        } else {
            Err(TunnelError::InvalidTunnelName(name))
        }
    }

    /// Get the raw name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether `name` is usable as a tunnel name
pub fn is_valid_tunnel_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl fmt::Display for TunnelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TunnelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TunnelName {
    type Error = TunnelError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<TunnelName> for String {
    fn from(name: TunnelName) -> Self {
        name.0
    }
}

/// Observed lifecycle phase of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelPhase {
    /// No configuration document
    Unconfigured,
    /// Configured, not running, not wanted
    Stopped,
    /// Wanted but not running; reconciliation will restart it
    Pending,
    /// Process observed in the process table
    Running,
}

impl TunnelPhase {
    /// Derive the phase from the desired and observed flags
    pub fn derive(has_config: bool, enabled: bool, running: bool) -> Self {
        match (has_config, enabled, running) {
            (_, _, true) => TunnelPhase::Running,
            (false, _, false) => TunnelPhase::Unconfigured,
            (true, true, false) => TunnelPhase::Pending,
            (true, false, false) => TunnelPhase::Stopped,
        }
    }
}

impl fmt::Display for TunnelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelPhase::Unconfigured => write!(f, "unconfigured"),
            TunnelPhase::Stopped => write!(f, "stopped"),
            TunnelPhase::Pending => write!(f, "pending"),
            TunnelPhase::Running => write!(f, "running"),
        }
    }
}
