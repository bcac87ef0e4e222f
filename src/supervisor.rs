//! Supervision of one long-running external command.
//!
//! Output lines and lifecycle changes are posted as [`ProcessEvent`]s to a
//! caller-supplied channel. The supervisor never touches caller state; whoever
//! owns the receiver decides which thread drains it.

use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::process_tree::{kill_group, kill_tree, ProcessTable, SystemProcessTable};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Output stream a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// How a supervised process ended, as far as the caller is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Non-zero exit, or no code at all (killed by a signal).
    Failed(Option<i32>),
    /// Cancelled by the caller. Whatever exit code followed is not interpreted.
    Cancelled,
}

impl Outcome {
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Started { pid: u32, command_line: String },
    /// One complete line, terminator stripped. Order is preserved per stream only.
    Line { stream: Stream, line: String },
    CancelRequested,
    /// Posted exactly once per process, after all output of a natural exit,
    /// or promptly after a cancel.
    Exited { code: Option<i32>, outcome: Outcome },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    Exited(Option<i32>),
    Cancelled,
    Closed,
}

impl ProcessState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Exited(_) | Self::Cancelled | Self::Closed)
    }
}

struct Shared {
    pid: u32,
    child: Mutex<Child>,
    cancelled: AtomicBool,
    exit_code: OnceLock<Option<i32>>,
    state: Mutex<ProcessState>,
    events: Sender<ProcessEvent>,
    table: Arc<dyn ProcessTable>,
}

impl Shared {
    fn post(&self, event: ProcessEvent) {
        // A dropped receiver only means nobody is listening any more.
        let _ = self.events.send(event);
    }

    fn transition(&self, from_running_to: ProcessState) {
        let mut state = lock(&self.state);
        if *state == ProcessState::Running {
            *state = from_running_to;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Launches external commands with piped, line-streamed output.
pub struct ProcessSupervisor {
    table: Arc<dyn ProcessTable>,
    poll_interval: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(table: Arc<dyn ProcessTable>, poll_interval: Duration) -> Self {
        Self {
            table,
            poll_interval,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(SystemProcessTable), config.poll_interval())
    }

    /// Starts `executable` with a single pre-formatted argument string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaunchFailure`] if the executable cannot be started
    #[instrument(skip(self, events))]
    pub fn start(
        &self,
        executable: &Path,
        arguments: &str,
        working_dir: &Path,
        events: Sender<ProcessEvent>,
    ) -> Result<ProcessHandle> {
        let mut command = Command::new(executable);
        apply_arguments(&mut command, arguments);
        command
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            command.creation_flags(CREATE_NO_WINDOW);
        }
        // Own group, so descendants outliving the root can still be killed.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| Error::LaunchFailure {
            program: executable.display().to_string(),
            source,
        })?;
        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        info!(pid, "Process started");

        let shared = Arc::new(Shared {
            pid,
            child: Mutex::new(child),
            cancelled: AtomicBool::new(false),
            exit_code: OnceLock::new(),
            state: Mutex::new(ProcessState::Created),
            events,
            table: Arc::clone(&self.table),
        });
        let control = ProcessControl {
            shared: Arc::clone(&shared),
        };

        *lock(&shared.state) = ProcessState::Running;
        shared.post(ProcessEvent::Started {
            pid,
            command_line: format!("{} {arguments}", executable.display()),
        });

        let mut readers = Vec::with_capacity(2);
        let spawned = spawn_reader(stdout, Stream::Stdout, &shared)
            .and_then(|reader| {
                readers.extend(reader);
                spawn_reader(stderr, Stream::Stderr, &shared)
            })
            .and_then(|reader| {
                readers.extend(reader);
                let waiter_shared = Arc::clone(&shared);
                let poll_interval = self.poll_interval;
                thread::Builder::new()
                    .name(format!("wait-{pid}"))
                    .spawn(move || wait_for_exit(&waiter_shared, readers, poll_interval))
            });

        match spawned {
            Ok(waiter) => Ok(ProcessHandle {
                control,
                stdin,
                waiter: Some(waiter),
                closed: false,
            }),
            Err(e) => {
                warn!(pid, error = %e, "Could not start supervision threads");
                control.cancel();
                let _ = lock(&shared.child).wait();
                Err(Error::IoError(e))
            }
        }
    }
}

#[cfg(windows)]
fn apply_arguments(command: &mut Command, arguments: &str) {
    use std::os::windows::process::CommandExt;
    command.raw_arg(arguments);
}

#[cfg(not(windows))]
fn apply_arguments(command: &mut Command, arguments: &str) {
    command.args(crate::command_line::split_arguments(arguments));
}

fn spawn_reader<R>(
    source: Option<R>,
    stream: Stream,
    shared: &Shared,
) -> std::io::Result<Option<JoinHandle<()>>>
where
    R: Read + Send + 'static,
{
    let Some(source) = source else {
        return Ok(None);
    };
    let events = shared.events.clone();
    thread::Builder::new()
        .name(format!("{stream}-{}", shared.pid))
        .spawn(move || read_lines(source, stream, &events))
        .map(Some)
}

fn read_lines(source: impl Read, stream: Stream, events: &Sender<ProcessEvent>) {
    let mut reader = BufReader::new(source);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                if events.send(ProcessEvent::Line { stream, line }).is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(%stream, error = %e, "Output stream closed with error");
                break;
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

fn wait_for_exit(shared: &Shared, readers: Vec<JoinHandle<()>>, poll_interval: Duration) {
    let status = poll_exit(shared, poll_interval);
    await_readers(shared, readers, poll_interval);

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!(pid = shared.pid, error = %e, "Could not collect exit status");
            None
        }
    };

    // Under the child lock so a concurrent cancel either lands before the
    // outcome is decided or sees the exit and backs off.
    let outcome = {
        let _child = lock(&shared.child);
        // Only this thread ever sets the code.
        let _ = shared.exit_code.set(code);
        if shared.cancelled.load(Ordering::SeqCst) {
            Outcome::Cancelled
        } else if code == Some(0) {
            Outcome::Success
        } else {
            Outcome::Failed(code)
        }
    };
    shared.transition(ProcessState::Exited(code));
    info!(pid = shared.pid, ?code, ?outcome, "Process exited");
    shared.post(ProcessEvent::Exited { code, outcome });
}

/// Waits for both output streams to close. Descendants can keep them open
/// after the root exited; a cancel stops the wait and abandons the tail.
fn await_readers(shared: &Shared, readers: Vec<JoinHandle<()>>, poll_interval: Duration) {
    while !readers.iter().all(JoinHandle::is_finished) {
        if shared.cancelled.load(Ordering::SeqCst) {
            debug!(pid = shared.pid, "Cancelled, not waiting for remaining output");
            return;
        }
        thread::sleep(poll_interval);
    }
    for reader in readers {
        let _ = reader.join();
    }
}

fn poll_exit(shared: &Shared, poll_interval: Duration) -> std::io::Result<ExitStatus> {
    loop {
        if let Some(status) = lock(&shared.child).try_wait()? {
            return Ok(status);
        }
        thread::sleep(poll_interval);
    }
}

/// Cloneable control over a running process, usable from any thread.
#[derive(Clone)]
pub struct ProcessControl {
    shared: Arc<Shared>,
}

impl fmt::Debug for ProcessControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessControl")
            .field("pid", &self.shared.pid)
            .field("state", &self.state())
            .finish()
    }
}

impl ProcessControl {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        *lock(&self.shared.state)
    }

    /// Sticky: once set it is never cleared.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }

    /// Exit code, absent until the process has exited or when killed by a signal.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.shared.exit_code.get().copied().flatten()
    }

    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.shared.exit_code.get().is_some()
    }

    /// Kills the process and all of its descendants.
    ///
    /// Idempotent, and a no-op once the exit has been reported. Death is
    /// asynchronous: the `Exited` event confirms it.
    #[instrument(skip(self), fields(pid = self.shared.pid))]
    pub fn cancel(&self) {
        // Holding the child lock keeps the waiter from reaping the pid or
        // deciding the outcome mid-kill.
        let mut child = lock(&self.shared.child);
        if self.has_exited() {
            debug!("Exit already reported, nothing to cancel");
            return;
        }
        if self.shared.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.transition(ProcessState::Cancelled);
        self.shared.post(ProcessEvent::CancelRequested);

        let table = self.shared.table.as_ref();
        // A reaped root's pid may already belong to someone else.
        let root_running = matches!(child.try_wait(), Ok(None));
        let mut killed = if root_running {
            kill_tree(table, self.shared.pid)
        } else {
            0
        };
        if kill_group(table, self.shared.pid) {
            killed += 1;
        }
        info!(killed, root_running, "Process tree killed");
    }
}

/// Owner of one supervised process. Closing or dropping it releases the OS
/// handle, cancelling first if the process is still running.
pub struct ProcessHandle {
    control: ProcessControl,
    stdin: Option<ChildStdin>,
    waiter: Option<JoinHandle<()>>,
    closed: bool,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("control", &self.control)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.control.pid()
    }

    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.control.state()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.control.exit_code()
    }

    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.control.has_exited()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// A control that can cancel this process from another thread.
    #[must_use]
    pub fn control(&self) -> ProcessControl {
        self.control.clone()
    }

    /// Releases the process. Blocks until the process has been reaped.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        if !self.control.state().is_terminal() {
            self.control.cancel();
        }
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.join();
        }
        self.stdin = None;
        *lock(&self.control.shared.state) = ProcessState::Closed;
        self.closed = true;
        debug!(pid = self.control.pid(), "Process handle closed");
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"hello\n"), "hello");
        assert_eq!(decode_line(b"hello\r\n"), "hello");
        assert_eq!(decode_line(b"partial"), "partial");
        assert_eq!(decode_line(b"caf\xc3\xa9\n"), "café");
        assert_eq!(decode_line(b"bad \xff\n"), "bad \u{fffd}");
    }

    #[test]
    fn test_read_lines_flushes_unterminated_tail() {
        let (tx, rx) = std::sync::mpsc::channel();
        read_lines(&b"one\ntwo\r\nthree"[..], Stream::Stderr, &tx);
        drop(tx);
        let lines: Vec<ProcessEvent> = rx.iter().collect();
        assert_eq!(
            lines,
            ["one", "two", "three"]
                .into_iter()
                .map(|line| ProcessEvent::Line {
                    stream: Stream::Stderr,
                    line: line.to_string(),
                })
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_outcome_success_only_for_clean_exit() {
        assert!(Outcome::Success.is_success());
        assert!(!Outcome::Failed(Some(0)).is_success());
        assert!(!Outcome::Cancelled.is_success());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ProcessState::Running.is_terminal());
        assert!(ProcessState::Cancelled.is_terminal());
        assert!(ProcessState::Exited(Some(1)).is_terminal());
        assert!(ProcessState::Closed.is_terminal());
    }
}
