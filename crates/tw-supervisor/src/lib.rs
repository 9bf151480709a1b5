//! tw-supervisor: keeps cloudflared tunnel processes converged to desired state
//!
//! The desired-state store records which tunnels should run, the process
//! supervisor launches and stops the external tunnel binary, and the
//! reconciler periodically restarts enabled tunnels whose process has gone
//! away. The `Fleet` serializes all of it per tunnel name, across every process
//! sharing the same configuration.

pub mod backoff;
pub mod daemon;
pub mod fleet;
mod locks;
pub mod process;
pub mod reconcile;
pub mod store;

pub use fleet::{Convergence, Fleet, StatusRecord};
pub use process::{ProcessSupervisor, StartOutcome, StopOutcome};
pub use reconcile::{Reconciler, SweepReport};
pub use store::{DesiredState, DesiredStateStore};
