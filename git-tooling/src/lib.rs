//! `folio-git-tooling`: version control client for the portfolio working copy.
//!
//! Wraps the `git` command-line tool around one fixed local working copy bound
//! to one fixed remote. Every public operation returns an explicit
//! `Result`; benign outcomes such as "nothing to commit" or "already up to
//! date" are reported as successful variants rather than errors.
//!
//! Authenticated operations (`pull`, `push`) write a short-lived credential
//! file under `.git/` and remove it again when the operation finishes,
//! whatever its result.

mod classify;
mod client;
mod credentials;
mod error;
mod runner;

pub use client::CloneOutcome;
pub use client::CommitIdentity;
pub use client::CommitOutcome;
pub use client::GitClient;
pub use client::GitClientConfig;
pub use client::PublishOutcome;
pub use client::SyncOutcome;
pub use error::GitError;
pub use runner::GitOutput;
pub use runner::GitRunner;
pub use runner::ProcessRunner;
pub use runner::redact_arg;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, GitError>;
