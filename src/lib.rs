pub use classifier::{classify, Classification, NOTHING_CHANGED};
pub use config::{Config, GIT_BIN_ENV};
pub use dispatcher::{CommandDispatcher, CommandReport, GitCommand};
pub use error::{Error, Result};
pub use git::{Git, GitCli};
pub use log_buffer::{LogBuffer, LogLevel, LogLine};
pub use repository::{RefreshSummary, Repository, RepositoryLink};
pub use selection::SelectionSnapshot;
pub use status::StatusReport;
pub use supervisor::{
    Outcome, ProcessControl, ProcessEvent, ProcessHandle, ProcessState, ProcessSupervisor, Stream,
};
pub use tags::{TagInfo, TagPanel};
pub use types::{BranchInfo, FileStatus, RawStatusEntry, RenameDetails, StatusFacets, Target};

use std::path::Path;

pub mod classifier;
pub mod command_line;
mod config;
mod dispatcher;
mod error;
mod git;
mod log_buffer;
pub mod process_tree;
mod repository;
mod selection;
pub mod status;
mod supervisor;
pub mod tags;
mod types;

/// Opens a repository and wraps it in a `CommandDispatcher`.
///
/// # Arguments
///
/// * `repo_path`: The path to the local working tree.
/// * `config`: Client configuration; decides which git executable runs.
///
/// # Errors
///
/// Returns an error if the path is not a directory or git cannot be found.
pub fn open(repo_path: &Path, config: &Config) -> Result<CommandDispatcher<GitCli>> {
    let repository = Repository::open(repo_path, config)?;
    Ok(CommandDispatcher::new(
        repository,
        ProcessSupervisor::from_config(config),
    ))
}

/// Opens a repository with the default configuration, honouring `GIT_PENDING_GIT`.
///
/// # Errors
///
/// Returns an error if the path is not a directory or git cannot be found.
pub fn open_default(repo_path: &Path) -> Result<CommandDispatcher<GitCli>> {
    open(repo_path, &Config::load(None)?)
}
