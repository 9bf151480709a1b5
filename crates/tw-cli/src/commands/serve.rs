//! Supervisor daemon command

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use tw_core::config::WardenConfig;
use tw_supervisor::daemon;

/// Run the supervisor in the foreground until Ctrl+C or SIGTERM
pub async fn serve_command(config: WardenConfig) -> Result<()> {
    tracing::info!(
        "tunnel-warden {} supervising {:?}",
        env!("CARGO_PKG_VERSION"),
        config.config_dir
    );

    let cancel = CancellationToken::new();
    daemon::cancel_on_shutdown_signal(cancel.clone());

    daemon::run(config, cancel)
        .await
        .context("Supervisor failed")
}
