//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use crate::output::{print_info, print_success, print_warning};
use tw_core::config::{self, WardenConfig};

/// Print the effective configuration as TOML
pub fn config_show(config: &WardenConfig) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    println!("{}", content);
    Ok(())
}

/// Print the configuration file location
pub fn config_path(explicit: Option<&Path>) {
    match explicit {
        Some(path) => println!("{}", path.display()),
        None => println!("{}", config::default_config_path().display()),
    }
}

/// Write a default configuration file
pub fn config_init(explicit: Option<&Path>, force: bool) -> Result<()> {
    let path = explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(config::default_config_path);

    if path.exists() && !force {
        print_warning(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(&path, &WardenConfig::default())
        .with_context(|| format!("Failed to write config to {:?}", path))?;
    print_success(&format!("Created config file: {:?}", path));
    Ok(())
}
