//! Process termination signals

use std::io;

/// Ask a process to exit (SIGTERM)
#[cfg(unix)]
pub fn terminate(pid: u32) -> io::Result<()> {
    send(pid, libc::SIGTERM)
}

/// Kill a process outright (SIGKILL)
#[cfg(unix)]
pub fn force_kill(pid: u32) -> io::Result<()> {
    send(pid, libc::SIGKILL)
}

/// A process that is already gone counts as signalled
#[cfg(unix)]
fn send(pid: u32, signal: libc::c_int) -> io::Result<()> {
    let result = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if result == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
pub fn terminate(pid: u32) -> io::Result<()> {
    force_kill(pid)
}

#[cfg(not(unix))]
pub fn force_kill(pid: u32) -> io::Result<()> {
    use sysinfo::{Pid, ProcessesToUpdate, System};

    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) if !process.kill() => Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            format!("failed to kill process {}", pid),
        )),
        _ => Ok(()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_signalling_a_missing_process_succeeds() {
        assert!(terminate(999_999_999).is_ok());
        assert!(force_kill(999_999_999).is_ok());
    }

    #[test]
    fn test_terminate_stops_child() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        terminate(child.id()).unwrap();
        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
