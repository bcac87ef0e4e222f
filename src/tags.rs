use serde::Serialize;
use tracing::{debug, instrument};

use crate::dispatcher::GitCommand;
use crate::error::{Error, Result};
use crate::git::Git;
use crate::repository::RepositoryLink;

const TAG_FORMAT: &str = "--format=%(refname:short)%09%(objectname:short)%09%(subject)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagInfo {
    pub name: String,
    pub commit: String,
    pub subject: String,
}

/// Parses tab-separated `name commit subject` lines.
#[must_use]
pub fn parse_tags(output: &str) -> Vec<TagInfo> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.splitn(3, '\t');
            TagInfo {
                name: fields.next().unwrap_or_default().to_string(),
                commit: fields.next().unwrap_or_default().to_string(),
                subject: fields.next().unwrap_or_default().to_string(),
            }
        })
        .collect()
}

/// Lists the repository's tags
///
/// # Errors
///
/// Returns an error if the git command fails
#[instrument(skip(git))]
pub fn list_tags(git: &impl Git) -> Result<Vec<TagInfo>> {
    let output = git.run_git_command(&["tag", "-l", TAG_FORMAT])?;
    let tags = parse_tags(&output);
    debug!(count = tags.len(), "Tags listed");
    Ok(tags)
}

/// Tag list bound to a repository it does not own.
#[derive(Debug)]
pub struct TagPanel<G> {
    link: RepositoryLink<G>,
    tags: Vec<TagInfo>,
}

impl<G> Default for TagPanel<G> {
    fn default() -> Self {
        Self {
            link: RepositoryLink::default(),
            tags: Vec::new(),
        }
    }
}

impl<G: Git> TagPanel<G> {
    #[must_use]
    pub fn new(link: RepositoryLink<G>) -> Self {
        Self {
            link,
            tags: Vec::new(),
        }
    }

    #[must_use]
    pub fn tags(&self) -> &[TagInfo] {
        &self.tags
    }

    /// Reloads the tag list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RepositoryGone`] if the repository is no longer open,
    /// or the git error if listing fails
    pub fn refresh(&mut self) -> Result<&[TagInfo]> {
        let git = self.link.resolve()?;
        self.tags = list_tags(git.as_ref())?;
        Ok(&self.tags)
    }

    /// Command deleting a listed tag, to be run through the dispatcher.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RepositoryGone`] if the repository is no longer open,
    /// or [`Error::GitCommandError`] if the tag is not listed
    pub fn delete_command(&self, name: &str) -> Result<GitCommand> {
        self.link.resolve()?;
        if !self.tags.iter().any(|tag| tag.name == name) {
            return Err(Error::GitCommandError(format!("unknown tag {name}")));
        }
        Ok(GitCommand::DeleteTag(name.to_string()))
    }
}
