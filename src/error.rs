#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Git command failed: {0}")]
    GitCommandError(String),

    #[error("Invalid repository: {0}")]
    InvalidRepository(String),

    #[error("Failed to launch {program}: {source}")]
    LaunchFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed status output: {0}")]
    StatusParseError(String),

    #[error("Another command is still running: {0}")]
    CommandInProgress(String),

    #[error("Repository is no longer available")]
    RepositoryGone,

    #[error("Git executable not found: {0}")]
    GitNotFound(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
