//! CLI command implementations

mod config;
mod serve;
mod status;
mod tunnel;

pub use config::{config_init, config_path, config_show};
pub use serve::serve_command;
pub use status::{logs_command, status_command};
pub use tunnel::{
    create_command, delete_command, disable_command, enable_command, start_command,
    stop_command, CreateArgs,
};
