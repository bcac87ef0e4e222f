//! Recursive termination of a process and everything it spawned.

use std::collections::HashSet;
use std::io;
use tracing::{debug, instrument, warn};

/// Reserved identifier of the platform's idle/scheduler process. Never a kill target.
pub const IDLE_PID: u32 = 0;

/// OS process table access needed for recursive termination.
pub trait ProcessTable: Send + Sync {
    /// Lists the direct children of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process table cannot be read
    fn child_pids(&self, pid: u32) -> io::Result<Vec<u32>>;

    /// Forcibly terminates `pid`. A process that no longer exists yields
    /// an error of kind [`io::ErrorKind::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be terminated
    fn terminate(&self, pid: u32) -> io::Result<()>;

    /// Forcibly terminates every member of process group `pgid`. An empty
    /// group yields [`io::ErrorKind::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns an error if the group cannot be signalled, and
    /// [`io::ErrorKind::Unsupported`] on platforms without process groups
    fn terminate_group(&self, _pgid: u32) -> io::Result<()> {
        Err(io::ErrorKind::Unsupported.into())
    }
}

/// Terminates `pid` and all of its descendants, deepest first, the root last.
///
/// Individual failures are swallowed: a process may exit on its own between
/// enumeration and the kill. Returns how many processes were terminated.
#[instrument(skip(table))]
pub fn kill_tree(table: &dyn ProcessTable, pid: u32) -> usize {
    let mut visited = HashSet::new();
    kill_recursive(table, pid, &mut visited)
}

fn kill_recursive(table: &dyn ProcessTable, pid: u32, visited: &mut HashSet<u32>) -> usize {
    if pid == IDLE_PID || pid == std::process::id() || !visited.insert(pid) {
        return 0;
    }

    let children = table.child_pids(pid).unwrap_or_else(|e| {
        debug!(pid, error = %e, "Could not list child processes");
        Vec::new()
    });
    let mut killed: usize = children
        .into_iter()
        .map(|child| kill_recursive(table, child, visited))
        .sum();

    match table.terminate(pid) {
        Ok(()) => {
            debug!(pid, "Process terminated");
            killed += 1;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(pid, "Process already exited");
        }
        Err(e) => warn!(pid, error = %e, "Failed to terminate process"),
    }
    killed
}

/// Terminates process group `pgid`, reaching descendants that were
/// reparented after their parent exited. Returns whether anything was signalled.
#[instrument(skip(table))]
pub fn kill_group(table: &dyn ProcessTable, pgid: u32) -> bool {
    if pgid == IDLE_PID || pgid == std::process::id() {
        return false;
    }
    match table.terminate_group(pgid) {
        Ok(()) => {
            debug!(pgid, "Process group terminated");
            true
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(pgid, "Process group already empty");
            false
        }
        Err(e) if e.kind() == io::ErrorKind::Unsupported => false,
        Err(e) => {
            warn!(pgid, error = %e, "Failed to terminate process group");
            false
        }
    }
}

/// Process table of the running operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessTable;

#[cfg(target_os = "linux")]
impl ProcessTable for SystemProcessTable {
    fn child_pids(&self, pid: u32) -> io::Result<Vec<u32>> {
        let mut children = Vec::new();
        for entry in std::fs::read_dir("/proc")?.flatten() {
            let Some(candidate) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            // Processes can vanish while the table is scanned.
            let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            if parse_stat_ppid(&stat) == Some(pid) {
                children.push(candidate);
            }
        }
        Ok(children)
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        unix::sigkill(pid)
    }

    fn terminate_group(&self, pgid: u32) -> io::Result<()> {
        unix::sigkill_group(pgid)
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
impl ProcessTable for SystemProcessTable {
    fn child_pids(&self, pid: u32) -> io::Result<Vec<u32>> {
        let output = std::process::Command::new("ps")
            .args(["-A", "-o", "pid=", "-o", "ppid="])
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other("ps failed"));
        }
        Ok(parse_ps_children(&String::from_utf8_lossy(&output.stdout), pid))
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        unix::sigkill(pid)
    }

    fn terminate_group(&self, pgid: u32) -> io::Result<()> {
        unix::sigkill_group(pgid)
    }
}

#[cfg(windows)]
impl ProcessTable for SystemProcessTable {
    fn child_pids(&self, pid: u32) -> io::Result<Vec<u32>> {
        let output = std::process::Command::new("wmic")
            .args([
                "process",
                "where",
                &format!("(ParentProcessId={pid})"),
                "get",
                "ProcessId",
            ])
            .output()?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect())
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        let status = std::process::Command::new("taskkill")
            .args(["/F", "/PID", &pid.to_string()])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            // taskkill exits 128 when the pid is gone
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("taskkill exited with {status}"),
            ))
        }
    }
}

#[cfg(unix)]
mod unix {
    use std::io;

    pub fn sigkill(pid: u32) -> io::Result<()> {
        let pid = to_pid(pid)?;
        // SAFETY: kill has no memory-safety preconditions.
        check(unsafe { libc::kill(pid, libc::SIGKILL) })
    }

    pub fn sigkill_group(pgid: u32) -> io::Result<()> {
        let pgid = to_pid(pgid)?;
        // SAFETY: getpgrp and killpg have no memory-safety preconditions.
        if pgid == unsafe { libc::getpgrp() } {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "refusing to kill own process group",
            ));
        }
        check(unsafe { libc::killpg(pgid, libc::SIGKILL) })
    }

    fn to_pid(pid: u32) -> io::Result<libc::pid_t> {
        libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))
    }

    fn check(rc: libc::c_int) -> io::Result<()> {
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Err(io::Error::new(io::ErrorKind::NotFound, err));
        }
        Err(err)
    }
}

/// Extracts the parent pid from a `/proc/<pid>/stat` line. The command name
/// is parenthesised and may contain spaces, so fields are read after the last `)`.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_stat_ppid(stat: &str) -> Option<u32> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let _state = fields.next()?;
    fields.next()?.parse().ok()
}

#[cfg_attr(any(target_os = "linux", not(unix)), allow(dead_code))]
fn parse_ps_children(listing: &str, parent: u32) -> Vec<u32> {
    listing
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse::<u32>().ok()?;
            let ppid = fields.next()?.parse::<u32>().ok()?;
            (ppid == parent).then_some(pid)
        })
        .collect()
}
