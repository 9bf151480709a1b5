//! Process table inspection
//!
//! Supervised processes are detached, so liveness is always answered by
//! scanning the host process table rather than by holding a child handle.

use std::path::Path;

use sysinfo::{ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, UpdateKind};

/// One live process as seen in the process table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Full argument vector, `argv[0]` first
    pub cmd: Vec<String>,
}

/// Source of process table snapshots
pub trait ProcessTable: Send + Sync {
    /// Every live (non-zombie) process with its command line
    fn snapshot(&self) -> Vec<ProcessEntry>;
}

/// Host process table, read through `sysinfo`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn snapshot(&self) -> Vec<ProcessEntry> {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_cmd(UpdateKind::Always),
        );

        system
            .processes()
            .iter()
            .filter(|(_, process)| process.thread_kind().is_none())
            .filter(|(_, process)| {
                !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
            })
            .map(|(pid, process)| ProcessEntry {
                pid: pid.as_u32(),
                cmd: process
                    .cmd()
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect(),
            })
            .collect()
    }
}

/// Whether a command line is the tunnel binary serving tunnel `name`
///
/// The binary must be `argv[0]`, or `argv[1]` when launched through an
/// interpreter, matched by exact path or file name. The tunnel is
/// referenced either by the stem of its `--config` document or by the
/// argument after `run`. Both are whole-argument comparisons, so `api`
/// never matches a process serving `api-internal`.
pub fn matches_tunnel(cmd: &[String], binary: &str, name: &str) -> bool {
    let binary_name = file_name(binary);
    let has_binary = cmd
        .iter()
        .take(2)
        .any(|arg| arg == binary || file_name(arg) == binary_name);

    has_binary && references_tunnel(cmd, name)
}

fn references_tunnel(cmd: &[String], name: &str) -> bool {
    let mut args = cmd.iter().peekable();
    while let Some(arg) = args.next() {
        let config_value = match arg.strip_prefix("--config=") {
            Some(value) => Some(value),
            None if arg == "--config" => args.peek().map(|v| v.as_str()),
            None => None,
        };
        if config_value.and_then(config_stem) == Some(name) {
            return true;
        }
        if arg == "run" && args.peek().map(|v| v.as_str()) == Some(name) {
            return true;
        }
    }
    false
}

/// Tunnel name encoded in a config document path (`/etc/cloudflared/<name>.yml`)
fn config_stem(path: &str) -> Option<&str> {
    let path = Path::new(path);
    match path.extension().and_then(|e| e.to_str()) {
        Some("yml") | Some("yaml") => path.file_stem().and_then(|s| s.to_str()),
        _ => None,
    }
}

fn file_name(arg: &str) -> &str {
    Path::new(arg)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(arg)
}
