//! Per-tunnel process logs
//!
//! Each tunnel's combined stdout/stderr is appended to one file; every launch
//! is preceded by a marker line so restarts are visible in the log.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tw_core::time::current_time_millis;

/// Bytes read from the end of a log when extracting its tail
const TAIL_WINDOW: u64 = 64 * 1024;

/// Open a tunnel log for appending, creating it and its directory
pub fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Record the start of a new process in the log
pub fn write_start_marker(log: &mut File, name: &str) -> io::Result<()> {
    writeln!(
        log,
        "\n=== Tunnel {} started at {} ===",
        name,
        current_time_millis()
    )?;
    log.flush()
}

/// Last `lines` lines of a log; empty when the log does not exist
pub fn tail(path: &Path, lines: usize) -> io::Result<String> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => return Err(e),
    };

    let len = file.metadata()?.len();
    let start = len.saturating_sub(TAIL_WINDOW);
    file.seek(SeekFrom::Start(start))?;

    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);

    let all: Vec<&str> = text.lines().collect();
    // A partial first line is dropped when the window cut into it
    let skip_partial = usize::from(start > 0 && !all.is_empty());
    let usable = &all[skip_partial..];
    let from = usable.len().saturating_sub(lines);
    Ok(usable[from..].join("\n"))
}
