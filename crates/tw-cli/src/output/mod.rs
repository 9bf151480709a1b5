//! Output formatting utilities for the CLI
//!
//! Tunnel status tables and colored status messages.

use tabled::{settings::Style, Table, Tabled};

use tw_core::time::{elapsed_millis, format_duration};
use tw_supervisor::StatusRecord;

/// Format tunnel status records as a table
///
/// Returns "No tunnels configured" when the list is empty.
pub fn format_tunnels(records: &[StatusRecord]) -> String {
    if records.is_empty() {
        return "No tunnels configured".to_string();
    }

    #[derive(Tabled)]
    struct TunnelRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "ENABLED")]
        enabled: String,
        #[tabled(rename = "PID")]
        pids: String,
        #[tabled(rename = "HOSTNAME")]
        hostname: String,
        #[tabled(rename = "UPTIME")]
        uptime: String,
    }

    let rows: Vec<TunnelRow> = records
        .iter()
        .map(|r| TunnelRow {
            name: r.name.clone(),
            status: r.phase.to_string(),
            enabled: if r.enabled { "yes" } else { "no" }.to_string(),
            pids: if r.pids.is_empty() {
                "-".to_string()
            } else {
                r.pids
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            },
            hostname: r.hostname.clone().unwrap_or_else(|| "-".to_string()),
            uptime: r
                .started_at
                .map(|t| format_duration(elapsed_millis(t) / 1000))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Print a success message in green with a checkmark prefix
///
/// Outputs to stdout.
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan to stdout
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
