#![cfg(unix)]

use git_pending::{Error, Outcome, ProcessEvent, ProcessHandle, ProcessState, ProcessSupervisor, Stream};
use std::path::Path;
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

fn start_sh(arguments: &str) -> (ProcessHandle, Receiver<ProcessEvent>) {
    let (sender, events) = mpsc::channel();
    let handle = ProcessSupervisor::default()
        .start(
            Path::new("sh"),
            arguments,
            &std::env::temp_dir(),
            sender,
        )
        .expect("Failed to start sh");
    (handle, events)
}

/// Collects events up to and including `Exited`.
fn until_exit(events: &Receiver<ProcessEvent>) -> Vec<ProcessEvent> {
    let mut seen = Vec::new();
    loop {
        let event = events
            .recv_timeout(TIMEOUT)
            .expect("Process did not exit in time");
        let done = matches!(event, ProcessEvent::Exited { .. });
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn lines(events: &[ProcessEvent], wanted: Stream) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            ProcessEvent::Line { stream, line } if *stream == wanted => Some(line.as_str()),
            _ => None,
        })
        .collect()
}

fn exit_of(events: &[ProcessEvent]) -> (Option<i32>, Outcome) {
    match events.last() {
        Some(ProcessEvent::Exited { code, outcome }) => (*code, *outcome),
        other => panic!("Expected an exit event, got {other:?}"),
    }
}

fn is_running(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        // Reparented zombies may linger in containers without a reaping init.
        std::fs::read_to_string(format!("/proc/{pid}/stat")).is_ok_and(|stat| {
            let state = stat.rsplit(')').next().unwrap_or_default().trim_start();
            !state.starts_with('Z') && !state.starts_with('X')
        })
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::process::Command::new("kill")
            .args(["-0", &pid.to_string()])
            .output()
            .is_ok_and(|output| output.status.success())
    }
}

#[test]
fn test_streams_lines_and_reports_success() {
    let (handle, events) = start_sh(r#"-c "echo one; echo two; echo oops 1>&2""#);
    let seen = until_exit(&events);

    assert!(matches!(seen.first(), Some(ProcessEvent::Started { pid, .. }) if *pid == handle.pid()));
    assert_eq!(lines(&seen, Stream::Stdout), vec!["one", "two"]);
    assert_eq!(lines(&seen, Stream::Stderr), vec!["oops"]);
    assert_eq!(exit_of(&seen), (Some(0), Outcome::Success));
    assert_eq!(handle.exit_code(), Some(0));
    assert!(handle.has_exited());
    assert!(!handle.is_cancelled());
    assert_eq!(handle.state(), ProcessState::Exited(Some(0)));

    let control = handle.control();
    handle.close();
    assert_eq!(control.state(), ProcessState::Closed);
    let rest: Vec<ProcessEvent> = events.try_iter().collect();
    assert!(
        rest.iter().all(|event| !matches!(event, ProcessEvent::Exited { .. })),
        "Exited must be posted once, got {rest:?}"
    );
}

#[test]
fn test_nonzero_exit_is_failure() {
    let (handle, events) = start_sh(r#"-c "exit 3""#);
    let seen = until_exit(&events);

    assert_eq!(exit_of(&seen), (Some(3), Outcome::Failed(Some(3))));
    assert_eq!(handle.exit_code(), Some(3));
    assert!(!handle.is_cancelled());
}

#[test]
fn test_unterminated_last_line_is_delivered() {
    let (_handle, events) = start_sh(r#"-c "printf 'first\nno newline'""#);
    let seen = until_exit(&events);

    assert_eq!(lines(&seen, Stream::Stdout), vec!["first", "no newline"]);
}

#[test]
fn test_runs_in_working_directory() {
    let (_handle, events) = start_sh(r#"-c "pwd -P""#);
    let seen = until_exit(&events);

    let expected = std::env::temp_dir()
        .canonicalize()
        .expect("Failed to canonicalize temp dir");
    assert_eq!(
        lines(&seen, Stream::Stdout),
        vec![expected.display().to_string()]
    );
}

/// Reads the pid a `sh -c "... & echo $!"` script printed.
fn background_pid(events: &Receiver<ProcessEvent>) -> u32 {
    loop {
        match events.recv_timeout(TIMEOUT).expect("No output from sh") {
            ProcessEvent::Line {
                stream: Stream::Stdout,
                line,
            } => return line.trim().parse().expect("Expected a pid"),
            ProcessEvent::Started { .. } => {}
            other => panic!("Unexpected event {other:?}"),
        }
    }
}

fn assert_gone(pid: u32) {
    let deadline = Instant::now() + TIMEOUT;
    while is_running(pid) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert!(!is_running(pid), "Descendant {pid} survived");
}

#[test]
fn test_cancel_kills_whole_tree() {
    let (handle, events) = start_sh(r#"-c "sleep 30 & echo $!; wait""#);
    let grandchild = background_pid(&events);
    assert!(is_running(grandchild));

    let started = Instant::now();
    handle.cancel();
    handle.cancel();
    assert!(handle.is_cancelled());
    assert_eq!(handle.state(), ProcessState::Cancelled);

    let seen = until_exit(&events);
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(
        seen.iter()
            .filter(|event| matches!(event, ProcessEvent::CancelRequested))
            .count(),
        1
    );
    assert_eq!(exit_of(&seen).1, Outcome::Cancelled);
    assert!(handle.is_cancelled());
    assert_gone(grandchild);
}

#[test]
fn test_cancel_reaches_descendant_holding_output_after_root_exit() {
    // The root exits at once; the background sleep keeps stdout open.
    let (handle, events) = start_sh(r#"-c "sleep 30 & echo $!""#);
    let orphan = background_pid(&events);
    thread::sleep(Duration::from_millis(300));
    assert!(
        !handle.has_exited(),
        "exit is reported only once the output is drained"
    );

    let started = Instant::now();
    handle.cancel();
    assert!(handle.is_cancelled());
    assert_eq!(handle.state(), ProcessState::Cancelled);

    let seen = until_exit(&events);
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(exit_of(&seen).1, Outcome::Cancelled);
    assert_gone(orphan);

    let closing = Instant::now();
    handle.close();
    assert!(closing.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_cancel_after_exit_is_noop() {
    let (handle, events) = start_sh(r#"-c "exit 0""#);
    until_exit(&events);

    handle.cancel();
    assert!(!handle.is_cancelled());
    assert_eq!(handle.state(), ProcessState::Exited(Some(0)));
    assert!(events.try_recv().is_err());
}

#[test]
fn test_drop_while_running_cancels() {
    let (handle, events) = start_sh(r#"-c "sleep 30""#);

    let started = Instant::now();
    drop(handle);
    assert!(started.elapsed() < TIMEOUT);

    let seen: Vec<ProcessEvent> = events.try_iter().collect();
    assert!(seen.contains(&ProcessEvent::CancelRequested));
    assert_eq!(exit_of(&seen).1, Outcome::Cancelled);
}

#[test]
fn test_missing_executable_is_launch_failure() {
    let (sender, _events) = mpsc::channel();
    let result = ProcessSupervisor::default().start(
        Path::new("/definitely/not/here/tool"),
        "--version",
        &std::env::temp_dir(),
        sender,
    );

    assert!(matches!(result, Err(Error::LaunchFailure { .. })));
}
