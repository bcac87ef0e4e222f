use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tracing::{debug, instrument};

use crate::config::Config;
use crate::error::{Error, Result};

/// Trait defining the synchronous git operations the client needs
pub trait Git {
    /// Working directory every command runs in
    fn repo_path(&self) -> &Path;

    /// Executable invoked for every command
    fn program(&self) -> &Path;

    /// Run a Git command and return its trimmed standard output
    ///
    /// # Errors
    ///
    /// Returns an error if git cannot be launched or exits unsuccessfully
    fn run_git_command(&self, args: &[&str]) -> Result<String> {
        self.run_git_command_raw(args)
            .map(|output| output.trim().to_string())
    }

    /// Run a Git command and return its standard output untouched
    ///
    /// # Errors
    ///
    /// Returns an error if git cannot be launched or exits unsuccessfully
    fn run_git_command_raw(&self, args: &[&str]) -> Result<String>;

    /// Stage the given paths
    ///
    /// # Errors
    ///
    /// Returns an error if the git command fails
    fn stage(&self, paths: &[String]) -> Result<()> {
        self.run_with_paths(&["add"], paths)
    }

    /// Remove the given paths from the index, keeping working-tree changes
    ///
    /// # Errors
    ///
    /// Returns an error if the git command fails
    fn unstage(&self, paths: &[String]) -> Result<()> {
        self.run_with_paths(&["reset", "-q", "HEAD"], paths)
    }

    /// Discard working-tree changes of the given paths
    ///
    /// # Errors
    ///
    /// Returns an error if the git command fails
    fn revert(&self, paths: &[String]) -> Result<()> {
        self.run_with_paths(&["checkout"], paths)
    }

    /// Commit the index with the given message
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails
    fn commit(&self, message: &str) -> Result<String> {
        self.run_git_command(&["commit", "-m", message])
    }

    /// Run `<prefix> -- <paths>`
    ///
    /// # Errors
    ///
    /// Returns an error if the git command fails
    fn run_with_paths(&self, prefix: &[&str], paths: &[String]) -> Result<()> {
        let mut args: Vec<&str> = prefix.to_vec();
        args.push("--");
        args.extend(paths.iter().map(String::as_str));
        self.run_git_command(&args).map(|_| ())
    }
}

/// Implementation of Git operations using the local Git CLI
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
    repo_path: PathBuf,
}

impl GitCli {
    /// Creates a new `GitCli` running `program` inside `repo_path`
    #[must_use]
    pub const fn new(program: PathBuf, repo_path: PathBuf) -> Self {
        Self { program, repo_path }
    }

    /// Creates a new `GitCli` using the executable resolved from `config`
    ///
    /// # Errors
    ///
    /// Returns an error if no git executable can be found
    pub fn from_config(config: &Config, repo_path: &Path) -> Result<Self> {
        let program = config.resolve_git_bin()?;
        debug!(program = %program.display(), "Resolved git executable");
        Ok(Self::new(program, repo_path.to_path_buf()))
    }

    fn output(&self, args: &[&str]) -> Result<Output> {
        Command::new(&self.program)
            .args(args)
            .current_dir(&self.repo_path)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| Error::LaunchFailure {
                program: self.program.display().to_string(),
                source,
            })
    }
}

impl Git for GitCli {
    fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn program(&self) -> &Path {
        &self.program
    }

    #[instrument(skip(self), fields(args = ?args, repo_path = %self.repo_path.display()))]
    fn run_git_command_raw(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args)?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            debug!(error = %error, status = %output.status, "Git command failed");
            return Err(Error::GitCommandError(error.trim().to_string()));
        }

        // Paths are bytes; a non-UTF-8 name must not fail the whole command.
        let result = String::from_utf8_lossy(&output.stdout).into_owned();

        debug!(
            output_length = result.len(),
            "Git command completed successfully"
        );
        Ok(result)
    }
}
