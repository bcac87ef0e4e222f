use std::sync::mpsc::{self, Receiver, RecvError, TryRecvError};
use tracing::{debug, info, instrument};

use crate::command_line::{join_arguments, quote_argument};
use crate::error::{Error, Result};
use crate::git::{Git, GitCli};
use crate::repository::{RefreshSummary, Repository};
use crate::supervisor::{Outcome, ProcessControl, ProcessEvent, ProcessHandle, ProcessSupervisor};
use crate::types::Target;

/// Long-running git commands executed under supervision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GitCommand {
    Push,
    Pull,
    FetchAll,
    DeleteTag(String),
    /// `git diff` of the given paths, against the index when `staged`.
    Diff { staged: bool, paths: Vec<String> },
    /// Pre-formatted argument string, quoted by the caller.
    Raw(String),
}

impl GitCommand {
    #[must_use]
    pub fn arguments(&self) -> String {
        match self {
            Self::Push => "push".to_string(),
            Self::Pull => "pull".to_string(),
            Self::FetchAll => "fetch --all".to_string(),
            Self::DeleteTag(name) => format!("tag -d {}", quote_argument(name)),
            Self::Diff { staged, paths } => {
                let mut args = vec!["diff"];
                if *staged {
                    args.push("--cached");
                }
                args.push("--");
                args.extend(paths.iter().map(String::as_str));
                join_arguments(&args)
            }
            Self::Raw(arguments) => arguments.clone(),
        }
    }
}

/// Result of a finished long command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReport {
    pub command: GitCommand,
    pub outcome: Outcome,
    pub exit_code: Option<i32>,
    pub refresh: RefreshSummary,
}

struct ActiveCommand {
    command: GitCommand,
    handle: ProcessHandle,
    events: Receiver<ProcessEvent>,
}

/// Runs user-level operations one at a time and refreshes the repository after each.
pub struct CommandDispatcher<G: Git = GitCli> {
    repository: Repository<G>,
    supervisor: ProcessSupervisor,
    active: Option<ActiveCommand>,
}

impl<G: Git> CommandDispatcher<G> {
    #[must_use]
    pub const fn new(repository: Repository<G>, supervisor: ProcessSupervisor) -> Self {
        Self {
            repository,
            supervisor,
            active: None,
        }
    }

    #[must_use]
    pub const fn repository(&self) -> &Repository<G> {
        &self.repository
    }

    pub fn repository_mut(&mut self) -> &mut Repository<G> {
        &mut self.repository
    }

    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    fn ensure_idle(&self) -> Result<()> {
        match &self.active {
            Some(active) => Err(Error::CommandInProgress(active.command.arguments())),
            None => Ok(()),
        }
    }

    /// Starts a long command. Drive it to completion with [`Self::poll`] or [`Self::wait`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandInProgress`] if a command is still running,
    /// [`Error::InvalidRepository`] for an invalidated repository and
    /// [`Error::LaunchFailure`] if git cannot be started
    #[instrument(skip(self))]
    pub fn start(&mut self, command: GitCommand) -> Result<ProcessControl> {
        self.ensure_idle()?;
        let git = self.repository.git()?;
        let program = git.program().to_path_buf();
        let working_dir = git.repo_path().to_path_buf();

        let arguments = command.arguments();
        self.repository.log_mut().push(format!("git {arguments}"));

        let (sender, events) = mpsc::channel();
        let handle = match self
            .supervisor
            .start(&program, &arguments, &working_dir, sender)
        {
            Ok(handle) => handle,
            Err(e) => {
                self.repository.log_mut().push_error(e.to_string());
                return Err(e);
            }
        };
        let control = handle.control();
        self.active = Some(ActiveCommand {
            command,
            handle,
            events,
        });
        Ok(control)
    }

    /// Starts `git diff` of `paths`, taken from `target`'s list: the working
    /// tree for the modified list, the index for the staged list. Output lines
    /// arrive like any long command's. Returns `None` when there is nothing to diff.
    ///
    /// # Errors
    ///
    /// Same as [`Self::start`]
    pub fn diff(&mut self, target: Target, paths: &[String]) -> Result<Option<ProcessControl>> {
        self.ensure_idle()?;
        if paths.is_empty() {
            self.repository.log_mut().push("No selected to diff");
            return Ok(None);
        }
        self.start(GitCommand::Diff {
            staged: target == Target::Staged,
            paths: paths.to_vec(),
        })
        .map(Some)
    }

    /// Diffs whatever is selected in `target`'s list.
    ///
    /// # Errors
    ///
    /// Same as [`Self::start`]
    pub fn diff_selected(&mut self, target: Target) -> Result<Option<ProcessControl>> {
        let paths = self.repository.selected_paths(target);
        self.diff(target, &paths)
    }

    /// Requests cancellation of the running command. Returns false when idle.
    pub fn cancel(&self) -> bool {
        self.active.as_ref().is_some_and(|active| {
            active.handle.cancel();
            true
        })
    }

    /// Applies every event already delivered without blocking. Returns the
    /// report once the command has finished.
    ///
    /// # Errors
    ///
    /// Returns the refresh error if the post-command refresh fails
    pub fn poll(&mut self) -> Result<Option<CommandReport>> {
        self.drive(false, |_| {})
    }

    /// Blocks until the running command finishes. Returns `None` when idle.
    ///
    /// # Errors
    ///
    /// Returns the refresh error if the post-command refresh fails
    pub fn wait(&mut self) -> Result<Option<CommandReport>> {
        self.drive(true, |_| {})
    }

    /// Like [`Self::wait`], also handing every event to `on_event`.
    ///
    /// # Errors
    ///
    /// Returns the refresh error if the post-command refresh fails
    pub fn wait_with(
        &mut self,
        on_event: impl FnMut(&ProcessEvent),
    ) -> Result<Option<CommandReport>> {
        self.drive(true, on_event)
    }

    fn drive(
        &mut self,
        blocking: bool,
        mut on_event: impl FnMut(&ProcessEvent),
    ) -> Result<Option<CommandReport>> {
        loop {
            let Some(active) = &self.active else {
                return Ok(None);
            };
            let received = if blocking {
                active.events.recv().map_err(|RecvError| TryRecvError::Disconnected)
            } else {
                active.events.try_recv()
            };
            let event = match received {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return Ok(None),
                // Every sender is gone without an exit report.
                Err(TryRecvError::Disconnected) => ProcessEvent::Exited {
                    code: None,
                    outcome: if active.handle.is_cancelled() {
                        Outcome::Cancelled
                    } else {
                        Outcome::Failed(None)
                    },
                },
            };
            on_event(&event);
            if let Some((code, outcome)) = self.apply_event(event) {
                return self.finish(code, outcome).map(Some);
            }
        }
    }

    fn apply_event(&mut self, event: ProcessEvent) -> Option<(Option<i32>, Outcome)> {
        let log = self.repository.log_mut();
        match event {
            ProcessEvent::Started { pid, command_line } => {
                debug!(pid, %command_line, "Command started");
                None
            }
            ProcessEvent::Line { line, .. } => {
                log.push(line);
                None
            }
            ProcessEvent::CancelRequested => {
                log.push("Cancelling...");
                None
            }
            ProcessEvent::Exited { code, outcome } => {
                log.push("Process exited");
                match outcome {
                    Outcome::Cancelled => log.push("Cancelled"),
                    Outcome::Failed(Some(code)) => log.push_error(format!("Error (exit code {code})")),
                    Outcome::Failed(None) => log.push_error("Error (terminated by signal)"),
                    Outcome::Success => log.push("All ok"),
                }
                Some((code, outcome))
            }
        }
    }

    fn finish(&mut self, exit_code: Option<i32>, outcome: Outcome) -> Result<CommandReport> {
        let Some(active) = self.active.take() else {
            return Err(Error::GitCommandError("no command is running".to_string()));
        };
        active.handle.close();
        info!(command = ?active.command, ?outcome, "Command finished");

        let refresh = self.repository.refresh()?;
        Ok(CommandReport {
            command: active.command,
            outcome,
            exit_code,
            refresh,
        })
    }

    /// Re-reads the working tree status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CommandInProgress`] while a command runs, otherwise the refresh error
    pub fn refresh(&mut self) -> Result<RefreshSummary> {
        self.ensure_idle()?;
        self.repository.refresh()
    }

    /// Commits the staged changes. Returns false when there was nothing to do.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails or the refresh fails
    pub fn commit(&mut self, message: &str) -> Result<bool> {
        self.ensure_idle()?;
        if message.trim().is_empty() {
            self.repository
                .log_mut()
                .push("Empty commit message. Please fill commit message");
            return Ok(false);
        }
        if self.repository.staged_list().is_empty() {
            self.repository.log_mut().push("No staged file");
            return Ok(false);
        }
        let output = self.run_short(|git| git.commit(message))?;
        self.repository.log_mut().extend(output.lines());
        self.repository.refresh()?;
        Ok(true)
    }

    /// Stages `paths`.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails or the refresh fails
    pub fn stage(&mut self, paths: &[String]) -> Result<()> {
        self.ensure_idle()?;
        if paths.is_empty() {
            self.repository.log_mut().push("No selected to stage");
            return Ok(());
        }
        for path in paths {
            self.repository.log_mut().push(format!("Selected:{path}"));
        }
        self.run_short(|git| git.stage(paths))?;
        self.repository.refresh().map(|_| ())
    }

    /// Stages whatever is selected in the modified list.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails or the refresh fails
    pub fn stage_selected(&mut self) -> Result<()> {
        let paths = self.repository.selected_paths(Target::Modified);
        self.stage(&paths)
    }

    /// Moves `paths` out of the index, keeping their working-tree changes.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails or the refresh fails
    pub fn unstage(&mut self, paths: &[String]) -> Result<()> {
        self.ensure_idle()?;
        if paths.is_empty() {
            self.repository.log_mut().push("No selected to unstage");
            return Ok(());
        }
        self.run_short(|git| git.unstage(paths))?;
        self.repository.refresh().map(|_| ())
    }

    /// Unstages whatever is selected in the staged list.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails or the refresh fails
    pub fn unstage_selected(&mut self) -> Result<()> {
        let paths = self.repository.selected_paths(Target::Staged);
        self.unstage(&paths)
    }

    /// Discards working-tree changes of `paths`.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails or the refresh fails
    pub fn revert(&mut self, paths: &[String]) -> Result<()> {
        self.ensure_idle()?;
        if paths.is_empty() {
            self.repository.log_mut().push("No selected to revert");
            return Ok(());
        }
        self.run_short(|git| git.revert(paths))?;
        self.repository.refresh().map(|_| ())
    }

    /// Reverts whatever is selected in the modified list.
    ///
    /// # Errors
    ///
    /// Returns an error if git fails or the refresh fails
    pub fn revert_selected(&mut self) -> Result<()> {
        let paths = self.repository.selected_paths(Target::Modified);
        self.revert(&paths)
    }

    fn run_short<T>(&mut self, operation: impl FnOnce(&G) -> Result<T>) -> Result<T> {
        let result = operation(self.repository.git()?);
        if let Err(e) = &result {
            self.repository.log_mut().push_error(e.to_string());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_arguments() {
        assert_eq!(GitCommand::Push.arguments(), "push");
        assert_eq!(GitCommand::Pull.arguments(), "pull");
        assert_eq!(GitCommand::FetchAll.arguments(), "fetch --all");
        assert_eq!(
            GitCommand::DeleteTag("release 1".to_string()).arguments(),
            "tag -d \"release 1\""
        );
        assert_eq!(
            GitCommand::Diff {
                staged: false,
                paths: vec!["a.txt".to_string(), "my file.txt".to_string()],
            }
            .arguments(),
            "diff -- a.txt \"my file.txt\""
        );
        assert_eq!(
            GitCommand::Diff {
                staged: true,
                paths: vec!["-odd.txt".to_string()],
            }
            .arguments(),
            "diff --cached -- -odd.txt"
        );
        assert_eq!(
            GitCommand::Raw("log -1 --oneline".to_string()).arguments(),
            "log -1 --oneline"
        );
    }
}
