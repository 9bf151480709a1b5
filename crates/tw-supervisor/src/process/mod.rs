//! Tunnel process management
//!
//! - `table`: process table snapshots and tunnel command-line matching
//! - `signal`: SIGTERM / SIGKILL delivery
//! - `logs`: per-tunnel log files
//! - `supervisor`: start / stop under the per-name lock

pub mod logs;
pub mod signal;
pub mod table;

mod supervisor;

pub use supervisor::{
    ProcessSupervisor, RuntimeHandle, Slot, SlotGuard, StartOutcome, StopOutcome,
};
pub use table::{matches_tunnel, ProcessEntry, ProcessTable, SystemProcessTable};
