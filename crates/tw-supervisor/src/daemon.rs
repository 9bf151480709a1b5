//! Supervisor daemon runner

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use tw_core::config::WardenConfig;
use tw_core::error::WardenError;
use tw_core::pidfile::PidFileGuard;

use crate::fleet::Fleet;
use crate::reconcile::Reconciler;

/// Run the supervisor until `cancel` fires
///
/// Refuses to start while another supervisor holds the PID file.
/// Tunnel processes are detached and keep running after shutdown; the next
/// supervisor finds them in the process table.
pub async fn run(config: WardenConfig, cancel: CancellationToken) -> Result<(), WardenError> {
    let pid_file = PidFileGuard::acquire(config.pid_file.clone())?;
    tracing::info!(
        "Tunnel supervisor starting (PID {}, state: {:?})",
        pid_file.pid(),
        config.state_file
    );

    let fleet = Arc::new(Fleet::new(config));
    serve(fleet, cancel).await?;

    tracing::info!("Tunnel supervisor shutdown complete");
    Ok(())
}

/// Initialize `fleet` and reconcile it until `cancel` fires
pub async fn serve(fleet: Arc<Fleet>, cancel: CancellationToken) -> Result<(), WardenError> {
    let orphans = fleet.initialize().await?;
    if orphans > 0 {
        tracing::info!("Dropped {} orphaned tunnel entries", orphans);
    }

    let enabled = fleet.store().list_enabled().await;
    tracing::info!("{} tunnel(s) enabled", enabled.len());

    Reconciler::new(fleet).run(cancel).await;
    Ok(())
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
pub fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Cannot listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
