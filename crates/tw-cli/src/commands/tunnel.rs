//! Tunnel admin commands

use std::path::PathBuf;

use anyhow::Result;

use tw_core::config::WardenConfig;
use tw_core::TunnelSpec;
use tw_supervisor::{Fleet, StartOutcome, StopOutcome};

use crate::output::{print_error, print_info, print_success, print_warning};

/// Parameters of `create`
#[derive(Debug, Clone)]
pub struct CreateArgs {
    pub name: String,
    pub hostname: String,
    pub service: String,
    pub tunnel_id: Option<String>,
    pub fallback: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub routes: Vec<(String, String)>,
    pub enable: bool,
}

/// Write a tunnel's configuration document
pub async fn create_command(config: &WardenConfig, args: CreateArgs) -> Result<()> {
    let fleet = Fleet::new(config.clone());
    let spec = TunnelSpec {
        name: args.name.clone(),
        tunnel_id: args.tunnel_id,
        hostname: args.hostname.clone(),
        service: args.service,
        fallback: args.fallback,
        credentials_file: args.credentials_file,
        routes: args.routes,
    };

    match fleet.create(&spec, args.enable).await {
        Ok(outcome) => {
            print_success(&format!(
                "Created tunnel {} for {} ({:?})",
                args.name,
                args.hostname,
                config.tunnel_config_path(&args.name)
            ));
            match outcome {
                Some(outcome) => report_start(&args.name, &outcome),
                None => print_info(&format!(
                    "Run 'tunnel-warden enable {}' to start it",
                    args.name
                )),
            }
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to create tunnel {}: {}", args.name, e));
            Err(e.into())
        }
    }
}

/// Mark a tunnel wanted and start it
pub async fn enable_command(config: &WardenConfig, name: &str) -> Result<()> {
    let fleet = Fleet::new(config.clone());
    match fleet.enable(name).await {
        Ok(outcome) => {
            report_start(name, &outcome);
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to enable tunnel {}: {}", name, e));
            if fleet.store().is_enabled(name).await {
                print_info("The tunnel stays enabled; the supervisor will keep retrying");
            }
            Err(e.into())
        }
    }
}

/// Mark a tunnel unwanted and stop it
pub async fn disable_command(config: &WardenConfig, name: &str) -> Result<()> {
    let fleet = Fleet::new(config.clone());
    match fleet.disable(name).await {
        Ok(StopOutcome::NotRunning) => {
            print_success(&format!("Tunnel {} disabled (was not running)", name));
            Ok(())
        }
        Ok(outcome) => {
            report_stop(name, &outcome);
            print_success(&format!("Tunnel {} disabled", name));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to disable tunnel {}: {}", name, e));
            Err(e.into())
        }
    }
}

/// Start a tunnel without changing its desired state
pub async fn start_command(config: &WardenConfig, name: &str) -> Result<()> {
    let fleet = Fleet::new(config.clone());
    match fleet.start(name).await {
        Ok(outcome) => {
            report_start(name, &outcome);
            if !fleet.store().is_enabled(name).await {
                print_info(&format!(
                    "Tunnel {} is not enabled and will not be restarted if it exits",
                    name
                ));
            }
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to start tunnel {}: {}", name, e));
            Err(e.into())
        }
    }
}

/// Stop a tunnel without changing its desired state
pub async fn stop_command(config: &WardenConfig, name: &str) -> Result<()> {
    let fleet = Fleet::new(config.clone());
    match fleet.stop(name).await {
        Ok(outcome) => {
            report_stop(name, &outcome);
            if fleet.store().is_enabled(name).await {
                print_warning(&format!(
                    "Tunnel {} is still enabled; the supervisor will restart it. Use 'disable' to keep it stopped",
                    name
                ));
            }
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to stop tunnel {}: {}", name, e));
            Err(e.into())
        }
    }
}

/// Stop a tunnel and remove its desired state and configuration document
pub async fn delete_command(config: &WardenConfig, name: &str) -> Result<()> {
    let fleet = Fleet::new(config.clone());
    match fleet.delete(name).await {
        Ok(()) => {
            print_success(&format!("Tunnel {} deleted", name));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("Failed to delete tunnel {}: {}", name, e));
            Err(e.into())
        }
    }
}

fn report_start(name: &str, outcome: &StartOutcome) {
    match outcome {
        StartOutcome::Started { pid } => {
            print_success(&format!("Tunnel {} started (PID: {})", name, pid));
        }
        StartOutcome::AlreadyRunning { pids } => {
            print_info(&format!("Tunnel {} already running (PID: {})", name, join_pids(pids)));
        }
    }
}

fn report_stop(name: &str, outcome: &StopOutcome) {
    match outcome {
        StopOutcome::NotRunning => print_info(&format!("Tunnel {} is not running", name)),
        StopOutcome::Stopped { terminated, killed } => {
            if !killed.is_empty() {
                print_warning(&format!(
                    "Tunnel {} ignored SIGTERM, killed PID {}",
                    name,
                    join_pids(killed)
                ));
            }
            print_success(&format!(
                "Tunnel {} stopped (PID: {})",
                name,
                join_pids(terminated)
            ));
        }
    }
}

fn join_pids(pids: &[u32]) -> String {
    pids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
