use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, instrument, warn};

use crate::classifier::classify;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::git::{Git, GitCli};
use crate::log_buffer::LogBuffer;
use crate::selection::SelectionSnapshot;
use crate::status::{self, StatusReport};
use crate::types::{BranchInfo, FileStatus, Target};

/// Counts produced by one refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub modified: usize,
    pub staged: usize,
    pub unclassified: usize,
}

/// Non-owning handle to a repository's git context, for secondary views.
#[derive(Debug)]
pub struct RepositoryLink<G> {
    git: Weak<G>,
}

impl<G> Default for RepositoryLink<G> {
    fn default() -> Self {
        Self { git: Weak::new() }
    }
}

impl<G> Clone for RepositoryLink<G> {
    fn clone(&self) -> Self {
        Self {
            git: Weak::clone(&self.git),
        }
    }
}

impl<G> RepositoryLink<G> {
    /// Looks up the repository.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RepositoryGone`] if it was closed or invalidated
    pub fn resolve(&self) -> Result<Arc<G>> {
        self.git.upgrade().ok_or(Error::RepositoryGone)
    }
}

/// An open working tree: its pending lists, branch and diagnostic log.
#[derive(Debug)]
pub struct Repository<G: Git = GitCli> {
    path: PathBuf,
    git: Option<Arc<G>>,
    modified: Vec<FileStatus>,
    staged: Vec<FileStatus>,
    branch: Option<BranchInfo>,
    log: LogBuffer,
}

impl Repository<GitCli> {
    /// Opens the working tree at `path` with the configured git executable.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a directory or git cannot be found
    #[instrument(skip(config))]
    pub fn open(path: &Path, config: &Config) -> Result<Self> {
        if !path.is_dir() {
            return Err(Error::InvalidRepository(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        let git = GitCli::from_config(config, path)?;
        debug!(path = %path.display(), "Opened repository");
        Ok(Self::new(git))
    }
}

impl<G: Git> Repository<G> {
    #[must_use]
    pub fn new(git: G) -> Self {
        Self {
            path: git.repo_path().to_path_buf(),
            git: Some(Arc::new(git)),
            modified: Vec::new(),
            staged: Vec::new(),
            branch: None,
            log: LogBuffer::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.git.is_some()
    }

    /// The git primitive of a still-valid repository.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRepository`] once the repository was invalidated
    pub fn git(&self) -> Result<&G> {
        self.git.as_deref().ok_or_else(|| {
            Error::InvalidRepository(format!("{} is no longer valid", self.path.display()))
        })
    }

    #[must_use]
    pub fn link(&self) -> RepositoryLink<G> {
        RepositoryLink {
            git: self.git.as_ref().map(Arc::downgrade).unwrap_or_default(),
        }
    }

    /// Drops the git context. Links stop resolving and refreshes fail from now on.
    pub fn invalidate(&mut self, reason: &str) {
        warn!(path = %self.path.display(), reason, "Repository invalidated");
        self.log.push_error(format!("Invalid repository: {reason}"));
        self.git = None;
    }

    /// Runs the status query. Safe to call off the consumer thread; hand the
    /// report back to [`Repository::apply_status`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRepository`] if the query fails
    pub fn collect_status(&self) -> Result<StatusReport> {
        status::collect(self.git()?)
    }

    /// Rebuilds both lists from a status report, keeping each list's selection.
    pub fn apply_status(&mut self, report: StatusReport) -> RefreshSummary {
        let modified_snapshot = SelectionSnapshot::capture(&self.modified);
        let staged_snapshot = SelectionSnapshot::capture(&self.staged);
        let classification = classify(&report.entries, &modified_snapshot, &staged_snapshot);

        let summary = RefreshSummary {
            modified: classification.modified.len(),
            staged: classification.staged.len(),
            unclassified: classification.unclassified.len(),
        };
        self.modified = classification.modified;
        self.staged = classification.staged;
        self.branch = report.branch;

        self.log.extend(classification.log);
        for entry in &classification.unclassified {
            self.log.push_error(format!(
                "Cannot classify [{}] {}",
                entry.state_text(),
                entry.path
            ));
        }
        summary
    }

    /// Re-reads the working tree status and rebuilds both lists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRepository`] (and invalidates this repository)
    /// if the status query fails; lists are left untouched on any error
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn refresh(&mut self) -> Result<RefreshSummary> {
        self.log
            .push(format!("Refreshing Directory: {}", self.path.display()));

        let report = match self.collect_status() {
            Ok(report) => report,
            Err(Error::InvalidRepository(reason)) => {
                if self.is_valid() {
                    self.invalidate(&reason);
                }
                return Err(Error::InvalidRepository(reason));
            }
            Err(e) => {
                self.log.push_error(e.to_string());
                return Err(e);
            }
        };

        let summary = self.apply_status(report);
        self.log.push("Refreshed");
        debug!(?summary, "Refresh complete");
        Ok(summary)
    }

    #[must_use]
    pub fn modified_list(&self) -> &[FileStatus] {
        &self.modified
    }

    #[must_use]
    pub fn staged_list(&self) -> &[FileStatus] {
        &self.staged
    }

    #[must_use]
    pub fn list(&self, target: Target) -> &[FileStatus] {
        match target {
            Target::Modified => &self.modified,
            Target::Staged => &self.staged,
        }
    }

    /// Marks a path selected or not in one list. Returns false if the path is not listed.
    pub fn set_selected(&mut self, target: Target, path: &str, selected: bool) -> bool {
        let list = match target {
            Target::Modified => &mut self.modified,
            Target::Staged => &mut self.staged,
        };
        list.iter_mut()
            .find(|status| status.path == path)
            .map(|status| status.selected = selected)
            .is_some()
    }

    #[must_use]
    pub fn selected_paths(&self, target: Target) -> Vec<String> {
        self.list(target)
            .iter()
            .filter(|status| status.selected)
            .map(|status| status.path.clone())
            .collect()
    }

    #[must_use]
    pub const fn branch(&self) -> Option<&BranchInfo> {
        self.branch.as_ref()
    }

    #[must_use]
    pub const fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut LogBuffer {
        &mut self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::NOTHING_CHANGED;
    use std::cell::RefCell;

    /// Serves canned status output, one response per call.
    struct ScriptedGit {
        responses: RefCell<Vec<Result<String>>>,
    }

    impl ScriptedGit {
        fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: RefCell::new(responses),
            }
        }
    }

    impl Git for ScriptedGit {
        fn repo_path(&self) -> &Path {
            Path::new("/work/repo")
        }

        fn program(&self) -> &Path {
            Path::new("git")
        }

        fn run_git_command_raw(&self, _args: &[&str]) -> Result<String> {
            self.responses.borrow_mut().remove(0)
        }
    }

    const HEAD: &str = "# branch.oid abc\0# branch.head main\0";

    fn status(body: &str) -> Result<String> {
        Ok(format!("{HEAD}{body}"))
    }

    #[test]
    fn test_refresh_rebuilds_lists_and_keeps_selection() {
        let first = status(
            "1 .M N... 100644 100644 100644 a a x.txt\0\
             1 MM N... 100644 100644 100644 a b z.txt\0",
        );
        let second = status(
            "1 .M N... 100644 100644 100644 a a x.txt\0\
             1 MM N... 100644 100644 100644 a b z.txt\0\
             ? new.txt\0",
        );
        let mut repo = Repository::new(ScriptedGit::new(vec![first, second]));

        repo.refresh().unwrap();
        assert!(repo.set_selected(Target::Modified, "z.txt", true));
        assert!(!repo.set_selected(Target::Staged, "x.txt", true));

        let summary = repo.refresh().unwrap();
        assert_eq!(
            summary,
            RefreshSummary {
                modified: 3,
                staged: 1,
                unclassified: 0
            }
        );
        assert_eq!(repo.selected_paths(Target::Modified), vec!["z.txt"]);
        assert!(repo.selected_paths(Target::Staged).is_empty());
        assert_eq!(repo.branch().map(|b| b.head.as_str()), Some("main"));
        assert!(repo.log().contains("Refreshed"));
    }

    #[test]
    fn test_refresh_with_nothing_changed() {
        let mut repo = Repository::new(ScriptedGit::new(vec![status("")]));
        repo.refresh().unwrap();
        let texts: Vec<&str> = repo.log().texts().collect();
        assert_eq!(
            texts,
            vec![
                "Refreshing Directory: /work/repo",
                NOTHING_CHANGED,
                "Refreshed"
            ]
        );
    }

    #[test]
    fn test_unclassifiable_entries_are_logged_as_errors() {
        let mut repo = Repository::new(ScriptedGit::new(vec![status(
            "u UU N... 100644 100644 100644 100644 a b c both.txt\0",
        )]));
        let summary = repo.refresh().unwrap();
        assert_eq!(summary.unclassified, 1);
        assert!(repo.log().contains("Cannot classify [Conflicted] both.txt"));
        assert!(repo.modified_list().is_empty());
    }

    #[test]
    fn test_unknown_status_code_does_not_hide_other_changes() {
        let mut repo = Repository::new(ScriptedGit::new(vec![status(
            "1 .Z N... 100644 100644 100644 a a odd.txt\0\
             1 .M N... 100644 100644 100644 a a other.txt\0",
        )]));
        let summary = repo.refresh().unwrap();
        assert_eq!(summary.unclassified, 1);
        assert_eq!(repo.modified_list().len(), 1);
        assert_eq!(repo.modified_list()[0].path, "other.txt");
        assert!(repo.log().contains("Cannot classify [Unknown] odd.txt"));
        assert!(repo.is_valid());
    }

    #[test]
    fn test_failed_status_invalidates_repository() {
        let mut repo = Repository::new(ScriptedGit::new(vec![
            status("1 .M N... 100644 100644 100644 a a x.txt\0"),
            Err(Error::GitCommandError("fatal: not a git repository".to_string())),
        ]));
        repo.refresh().unwrap();
        let link = repo.link();
        assert!(link.resolve().is_ok());

        let err = repo.refresh().unwrap_err();
        assert!(matches!(err, Error::InvalidRepository(_)));
        assert!(!repo.is_valid());
        assert_eq!(repo.modified_list().len(), 1, "lists stay as they were");
        assert!(matches!(link.resolve(), Err(Error::RepositoryGone)));
        assert!(matches!(repo.refresh(), Err(Error::InvalidRepository(_))));
    }

    #[test]
    fn test_malformed_status_keeps_repository_valid() {
        let mut repo = Repository::new(ScriptedGit::new(vec![status("zz broken\0")]));
        assert!(matches!(
            repo.refresh().unwrap_err(),
            Error::StatusParseError(_)
        ));
        assert!(repo.is_valid());
    }

    #[test]
    fn test_default_link_never_resolves() {
        let link: RepositoryLink<ScriptedGit> = RepositoryLink::default();
        assert!(matches!(link.resolve(), Err(Error::RepositoryGone)));
    }
}
