use std::path::PathBuf;

/// Errors surfaced by the version control client.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    /// The working copy directory is missing, so no command can run in it.
    #[error("working copy does not exist: {}", path.display())]
    MissingWorkingCopy { path: PathBuf },

    /// `clone` was requested without a configured remote URL.
    #[error("remote repository URL is not configured")]
    MissingRemote,

    /// The remote URL could not be parsed for credential injection.
    #[error("invalid remote URL: {0}")]
    InvalidRemote(String),

    /// The `git` binary could not be started.
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// `git` ran and exited non-zero with an outcome that is not benign.
    #[error("git {command} failed (exit {code}): {detail}")]
    CommandFailed {
        command: String,
        code: i32,
        detail: String,
    },

    /// The temporary credential file could not be written.
    #[error("failed to configure credentials: {0}")]
    Credentials(String),
}

impl GitError {
    /// Short name of the git subcommand that failed, when known.
    pub fn command(&self) -> Option<&str> {
        match self {
            GitError::Spawn { command, .. } | GitError::CommandFailed { command, .. } => {
                Some(command.as_str())
            }
            _ => None,
        }
    }
}
