//! Status and log commands

use anyhow::{Context, Result};

use tw_core::config::WardenConfig;
use tw_supervisor::Fleet;

use crate::output::{format_tunnels, print_error, print_info};

/// Show every known tunnel, or one
pub async fn status_command(config: &WardenConfig, name: Option<&str>, json: bool) -> Result<()> {
    let fleet = Fleet::new(config.clone());
    let records = match name {
        Some(name) => match fleet.status_of(name).await {
            Ok(record) => vec![record],
            Err(e) => {
                print_error(&format!("Failed to get status of {}: {}", name, e));
                return Err(e.into());
            }
        },
        None => fleet.status().await,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        println!("{}", format_tunnels(&records));
    }
    Ok(())
}

/// Print the last lines of a tunnel's log
pub fn logs_command(config: &WardenConfig, name: &str, lines: Option<usize>) -> Result<()> {
    tw_core::TunnelName::new(name)?;
    let fleet = Fleet::new(config.clone());
    let lines = lines.unwrap_or(config.log_tail_lines);
    let path = fleet.supervisor().log_path(name);

    let tail = fleet
        .supervisor()
        .log_tail(name, lines)
        .with_context(|| format!("Failed to read log {:?}", path))?;
    if tail.is_empty() {
        print_info(&format!("No log output for tunnel {} ({:?})", name, path));
    } else {
        println!("{}", tail);
    }
    Ok(())
}
