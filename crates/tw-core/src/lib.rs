//! tw-core: Core abstractions and configuration for tunnel-warden
//!
//! This crate provides the error taxonomy, the supervisor configuration,
//! and the per-tunnel configuration documents shared by the supervisor
//! and the CLI.

pub mod config;
pub mod error;
pub mod fsutil;
pub mod ingress;
pub mod lockfile;
pub mod pidfile;
pub mod time;
pub mod types;

pub use config::WardenConfig;
pub use error::{ConfigError, StoreError, TunnelError, WardenError};
pub use ingress::{IngressRule, TunnelConfig, TunnelSpec};
pub use types::{TunnelName, TunnelPhase};
