//! tunnel-warden CLI
//!
//! Single binary for the supervisor daemon (`serve`) and the tunnel admin
//! commands (create, enable, disable, start, stop, delete, status, logs).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tunnel_warden::commands::{self, CreateArgs};
use tw_core::config;

#[derive(Parser)]
#[command(name = "tunnel-warden")]
#[command(author, version, about = "Keeps a host's cloudflared tunnels running")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "TUNNEL_WARDEN_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor: restart enabled tunnels whose process has exited
    Serve,

    /// Write a tunnel configuration document
    Create {
        /// Tunnel name (letters, numbers, hyphens and underscores)
        name: String,
        /// Public hostname routed through the tunnel
        #[arg(long)]
        hostname: String,
        /// Origin service: a port, host:port or URL
        #[arg(long)]
        service: String,
        /// Tunnel identifier assigned by the backend (defaults to the name)
        #[arg(long)]
        tunnel_id: Option<String>,
        /// Catch-all service for unmatched requests
        #[arg(long)]
        fallback: Option<String>,
        /// Credentials file (defaults to <config_dir>/<name>.json)
        #[arg(long)]
        credentials_file: Option<PathBuf>,
        /// Additional route as HOSTNAME=SERVICE (repeatable)
        #[arg(long = "route", value_name = "HOSTNAME=SERVICE", value_parser = parse_route)]
        routes: Vec<(String, String)>,
        /// Enable and start the tunnel right away
        #[arg(long)]
        enable: bool,
    },

    /// Mark a tunnel as wanted and start it
    Enable { name: String },

    /// Mark a tunnel as unwanted and stop it
    Disable { name: String },

    /// Start a tunnel process
    Start { name: String },

    /// Stop a tunnel process (an enabled tunnel is restarted by the supervisor)
    Stop { name: String },

    /// Stop a tunnel and remove its state and configuration document
    Delete { name: String },

    /// Show tunnel status
    Status {
        /// Only this tunnel
        name: Option<String>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show the end of a tunnel's log
    Logs {
        name: String,
        /// Number of lines (defaults to log_tail_lines)
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Show the configuration file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

/// Split a `--route` value into hostname and service
fn parse_route(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((hostname, service)) if !hostname.is_empty() && !service.is_empty() => {
            Ok((hostname.to_string(), service.to_string()))
        }
        _ => Err(format!("expected HOSTNAME=SERVICE, got '{}'", value)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity; the daemon logs lifecycle events by default
    let default_level = if matches!(cli.command, Commands::Serve) {
        "info"
    } else {
        "warn"
    };
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => default_level,
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let explicit = cli.config.as_deref();

    // Commands that must work without a loadable configuration
    match &cli.command {
        Commands::Config {
            action: ConfigAction::Path,
        } => {
            commands::config_path(explicit);
            return Ok(());
        }
        Commands::Config {
            action: ConfigAction::Init { force },
        } => {
            return commands::config_init(explicit, *force);
        }
        _ => {}
    }

    let config = config::resolve(explicit).with_context(|| match explicit {
        Some(path) => format!("Failed to load config from {:?}", path),
        None => "Failed to load config".to_string(),
    })?;

    match cli.command {
        Commands::Serve => commands::serve_command(config).await?,

        Commands::Create {
            name,
            hostname,
            service,
            tunnel_id,
            fallback,
            credentials_file,
            routes,
            enable,
        } => {
            let args = CreateArgs {
                name,
                hostname,
                service,
                tunnel_id,
                fallback,
                credentials_file,
                routes,
                enable,
            };
            commands::create_command(&config, args).await?;
        }

        Commands::Enable { name } => commands::enable_command(&config, &name).await?,
        Commands::Disable { name } => commands::disable_command(&config, &name).await?,
        Commands::Start { name } => commands::start_command(&config, &name).await?,
        Commands::Stop { name } => commands::stop_command(&config, &name).await?,
        Commands::Delete { name } => commands::delete_command(&config, &name).await?,

        Commands::Status { name, json } => {
            commands::status_command(&config, name.as_deref(), json).await?;
        }

        Commands::Logs { name, lines } => commands::logs_command(&config, &name, lines)?,

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(&config)?,
            // Handled before the configuration is loaded
            ConfigAction::Path | ConfigAction::Init { .. } => {}
        },
    }

    Ok(())
}
