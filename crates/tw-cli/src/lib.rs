//! tunnel-warden: supervisor daemon and admin CLI for cloudflared tunnels
//!
//! Provides the `tunnel-warden` binary. Admin commands work directly on the
//! configuration directory, the desired-state document and the process
//! table, so they do not need a running daemon.

pub mod commands;
pub mod output;
