//! The version control client.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::classify::{is_nothing_to_commit, is_up_to_date};
use crate::credentials::CredentialScope;
use crate::{GitError, GitOutput, GitRunner, ProcessRunner, Result};

/// Author identity written into the working copy before committing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        Self {
            name: "Automated Action".to_string(),
            email: "action@automaton.bot".to_string(),
        }
    }
}

/// Static configuration of the client: one working copy, one remote.
#[derive(Debug, Clone)]
pub struct GitClientConfig {
    /// Absolute path of the working copy.
    pub repo_path: PathBuf,
    /// Remote URL without credentials, e.g. `https://github.com/acme/site.git`.
    pub remote_url: Option<String>,
    /// Access token injected for clone/pull/push. Unauthenticated remotes
    /// (local paths, ssh) work without one.
    pub token: Option<String>,
    pub identity: CommitIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneOutcome {
    Cloned { path: PathBuf },
    AlreadyPresent { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Transferred { summary: String },
    UpToDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { summary: String },
    NothingToCommit,
}

/// Result of [`GitClient::add_commit_push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Pushed { message: String },
    NoChanges,
}

impl fmt::Display for CloneOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloneOutcome::Cloned { path } => write!(f, "Cloned to {}", path.display()),
            CloneOutcome::AlreadyPresent { path } => {
                write!(f, "Repository already exists at {}", path.display())
            }
        }
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Transferred { summary } if summary.is_empty() => write!(f, "Done"),
            SyncOutcome::Transferred { summary } => write!(f, "{summary}"),
            SyncOutcome::UpToDate => write!(f, "Already up to date"),
        }
    }
}

impl fmt::Display for CommitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitOutcome::Committed { summary } => write!(f, "{summary}"),
            CommitOutcome::NothingToCommit => write!(f, "Nothing to commit"),
        }
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::Pushed { message } => {
                write!(f, "Successfully pushed changes: {message}")
            }
            PublishOutcome::NoChanges => write!(f, "No changes detected to commit or push"),
        }
    }
}

/// Clone/pull/add/commit/push against a single working copy.
///
/// Operations block until the git process exits. The client holds no
/// mutable state; serializing concurrent operations is the caller's job.
#[derive(Clone)]
pub struct GitClient {
    config: GitClientConfig,
    runner: Arc<dyn GitRunner>,
}

impl fmt::Debug for GitClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitClient")
            .field("repo_path", &self.config.repo_path)
            .field("remote_url", &self.config.remote_url)
            .field("token", &self.config.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl GitClient {
    pub fn new(config: GitClientConfig) -> Self {
        Self::with_runner(config, Arc::new(ProcessRunner::default()))
    }

    pub fn with_runner(config: GitClientConfig, runner: Arc<dyn GitRunner>) -> Self {
        Self { config, runner }
    }

    pub fn repo_path(&self) -> &Path {
        &self.config.repo_path
    }

    pub fn has_token(&self) -> bool {
        self.config.token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Whether the working copy has been cloned (a `.git` directory exists).
    pub fn working_copy_exists(&self) -> bool {
        self.config.repo_path.join(".git").is_dir()
    }

    /// Clone the remote into the working-copy path.
    ///
    /// A no-op when the path already exists. The token is only present in
    /// the clone URL; the stored `origin` URL is reset to the plain one.
    pub fn clone_repo(&self) -> Result<CloneOutcome> {
        let path = self.config.repo_path.clone();
        if path.exists() {
            return Ok(CloneOutcome::AlreadyPresent { path });
        }

        let remote = self
            .config
            .remote_url
            .as_deref()
            .ok_or(GitError::MissingRemote)?;
        let (parent, name) = split_repo_path(&path)?;
        std::fs::create_dir_all(&parent).map_err(|source| GitError::Spawn {
            command: "clone".to_string(),
            source,
        })?;

        let clone_url = match self.token() {
            Some(token) => authenticated_url(remote, token)?,
            None => remote.to_string(),
        };

        tracing::info!("cloning {} into {}", remote, path.display());
        let output = self.runner.run(&parent, &["clone", &clone_url, &name])?;
        if !output.success() {
            return Err(failed("clone", &output));
        }

        if clone_url != remote {
            let output = self
                .runner
                .run(&path, &["remote", "set-url", "origin", remote])?;
            if !output.success() {
                tracing::warn!("failed to reset origin URL: {}", output.detail());
            }
        }

        Ok(CloneOutcome::Cloned { path })
    }

    /// Pull from the remote with temporary credentials.
    pub fn pull(&self) -> Result<SyncOutcome> {
        self.ensure_working_copy()?;
        let _credentials = self.credentials()?;
        let output = self.git(&["pull"])?;
        sync_outcome("pull", &output)
    }

    /// Stage changes matching `pathspec` (usually `.`).
    pub fn add(&self, pathspec: &str) -> Result<String> {
        self.ensure_working_copy()?;
        let output = self.git(&["add", pathspec])?;
        if output.success() {
            Ok(format!("Staged {pathspec}"))
        } else {
            Err(failed("add", &output))
        }
    }

    /// Commit staged changes as the bot identity.
    pub fn commit(&self, message: &str) -> Result<CommitOutcome> {
        self.ensure_working_copy()?;
        self.ensure_identity();

        let output = self.git(&["commit", "-m", message])?;
        if output.success() {
            let summary = output.stdout.lines().next().unwrap_or("").trim().to_string();
            return Ok(CommitOutcome::Committed { summary });
        }
        if is_nothing_to_commit(&output) {
            return Ok(CommitOutcome::NothingToCommit);
        }
        Err(failed("commit", &output))
    }

    /// Push to the remote with temporary credentials.
    pub fn push(&self) -> Result<SyncOutcome> {
        self.ensure_working_copy()?;
        let _credentials = self.credentials()?;
        let output = self.git(&["push"])?;
        sync_outcome("push", &output)
    }

    /// `add .`, then commit, then push; stops at the first failing stage.
    ///
    /// A clean tree after staging ends the sequence successfully without
    /// contacting the remote.
    pub fn add_commit_push(&self, message: &str) -> Result<PublishOutcome> {
        tracing::info!("add/commit/push: {message}");

        self.add(".")?;

        match self.commit(message)? {
            CommitOutcome::NothingToCommit => {
                tracing::info!("nothing to commit, skipping push");
                return Ok(PublishOutcome::NoChanges);
            }
            CommitOutcome::Committed { summary } => {
                tracing::debug!("committed: {summary}");
            }
        }

        self.push()?;
        Ok(PublishOutcome::Pushed {
            message: message.to_string(),
        })
    }

    fn token(&self) -> Option<&str> {
        self.config.token.as_deref().filter(|t| !t.is_empty())
    }

    fn git(&self, args: &[&str]) -> Result<GitOutput> {
        self.runner.run(&self.config.repo_path, args)
    }

    fn ensure_working_copy(&self) -> Result<()> {
        if self.config.repo_path.is_dir() {
            Ok(())
        } else {
            Err(GitError::MissingWorkingCopy {
                path: self.config.repo_path.clone(),
            })
        }
    }

    fn ensure_identity(&self) {
        let identity = &self.config.identity;
        for (key, value) in [
            ("user.email", identity.email.as_str()),
            ("user.name", identity.name.as_str()),
        ] {
            match self.git(&["config", key, value]) {
                Ok(output) if output.success() => {}
                Ok(output) => tracing::warn!("failed to set {key}: {}", output.detail()),
                Err(e) => tracing::warn!("failed to set {key}: {e}"),
            }
        }
    }

    /// Configure credentials when both a token and a remote are known.
    fn credentials(&self) -> Result<Option<CredentialScope<'_>>> {
        let (Some(token), Some(remote)) = (self.token(), self.config.remote_url.as_deref()) else {
            tracing::debug!("no access token configured, running unauthenticated");
            return Ok(None);
        };
        CredentialScope::acquire(self.runner.as_ref(), &self.config.repo_path, remote, token)
            .map(Some)
    }
}

fn sync_outcome(command: &str, output: &GitOutput) -> Result<SyncOutcome> {
    if is_up_to_date(output) {
        return Ok(SyncOutcome::UpToDate);
    }
    if output.success() {
        return Ok(SyncOutcome::Transferred {
            summary: output.detail(),
        });
    }
    Err(failed(command, output))
}

fn failed(command: &str, output: &GitOutput) -> GitError {
    GitError::CommandFailed {
        command: command.to_string(),
        code: output.code,
        detail: output.detail(),
    }
}

fn split_repo_path(path: &Path) -> Result<(PathBuf, String)> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| GitError::MissingWorkingCopy {
            path: path.to_path_buf(),
        })?;
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((parent, name))
}

fn authenticated_url(remote: &str, token: &str) -> Result<String> {
    let mut parsed =
        url::Url::parse(remote).map_err(|e| GitError::InvalidRemote(format!("{e}")))?;
    parsed
        .set_username(&token.replace('%', "%25"))
        .map_err(|()| GitError::InvalidRemote(format!("cannot embed token in {remote}")))?;
    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CREDENTIALS_FILE;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned outputs keyed by git subcommand and records every call.
    #[derive(Default)]
    struct ScriptedRunner {
        calls: Mutex<Vec<Vec<String>>>,
        replies: Mutex<Vec<(String, VecDeque<GitOutput>)>>,
    }

    impl ScriptedRunner {
        fn reply(&self, subcommand: &str, code: i32, stdout: &str, stderr: &str) {
            let output = GitOutput {
                code,
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            };
            let mut replies = self.replies.lock().unwrap();
            match replies.iter_mut().find(|(name, _)| name.as_str() == subcommand) {
                Some((_, queue)) => queue.push_back(output),
                None => replies.push((subcommand.to_string(), VecDeque::from([output]))),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|args| args.join(" "))
                .collect()
        }

        fn subcommands(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|args| args[0].clone())
                .filter(|name| name != "config")
                .collect()
        }
    }

    impl GitRunner for ScriptedRunner {
        fn run(&self, _cwd: &Path, args: &[&str]) -> std::result::Result<GitOutput, GitError> {
            self.calls
                .lock()
                .unwrap()
                .push(args.iter().map(|a| (*a).to_string()).collect());
            let mut replies = self.replies.lock().unwrap();
            let reply = replies
                .iter_mut()
                .find(|(name, _)| name.as_str() == args[0])
                .and_then(|(_, queue)| queue.pop_front());
            Ok(reply.unwrap_or_default())
        }
    }

    fn working_copy() -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        dir
    }

    fn client(repo: &Path, token: Option<&str>, runner: Arc<ScriptedRunner>) -> GitClient {
        GitClient::with_runner(
            GitClientConfig {
                repo_path: repo.to_path_buf(),
                remote_url: Some("https://github.com/acme/site.git".to_string()),
                token: token.map(str::to_string),
                identity: CommitIdentity::default(),
            },
            runner,
        )
    }

    #[test]
    fn clean_tree_short_circuits_before_push() {
        let repo = working_copy();
        let runner = Arc::new(ScriptedRunner::default());
        runner.reply(
            "commit",
            1,
            "On branch main\nnothing to commit, working tree clean\n",
            "",
        );

        let outcome = client(repo.path(), Some("tok"), Arc::clone(&runner))
            .add_commit_push("Update w3")
            .unwrap();

        assert_eq!(outcome, PublishOutcome::NoChanges);
        assert_eq!(outcome.to_string(), "No changes detected to commit or push");
        assert_eq!(runner.subcommands(), vec!["add", "commit"]);
    }

    #[test]
    fn full_sequence_pushes_after_commit() {
        let repo = working_copy();
        let runner = Arc::new(ScriptedRunner::default());
        runner.reply("commit", 0, "[main 1a2b3c4] Create w4\n 1 file changed\n", "");

        let outcome = client(repo.path(), None, Arc::clone(&runner))
            .add_commit_push("Create w4")
            .unwrap();

        assert_eq!(
            outcome,
            PublishOutcome::Pushed {
                message: "Create w4".to_string()
            }
        );
        assert_eq!(runner.subcommands(), vec!["add", "commit", "push"]);
    }

    #[test]
    fn failing_add_aborts_sequence() {
        let repo = working_copy();
        let runner = Arc::new(ScriptedRunner::default());
        runner.reply("add", 128, "", "fatal: index.lock exists\n");

        let err = client(repo.path(), None, Arc::clone(&runner))
            .add_commit_push("Delete w2")
            .unwrap_err();

        assert_eq!(err.command(), Some("add"));
        assert!(err.to_string().contains("index.lock"));
        assert_eq!(runner.subcommands(), vec!["add"]);
    }

    #[test]
    fn failing_push_surfaces_push_error() {
        let repo = working_copy();
        let runner = Arc::new(ScriptedRunner::default());
        runner.reply("commit", 0, "[main 1a2b3c4] x\n", "");
        runner.reply("push", 1, "", "! [rejected] main -> main (fetch first)\n");

        let err = client(repo.path(), Some("tok"), Arc::clone(&runner))
            .add_commit_push("x")
            .unwrap_err();

        assert_eq!(err.command(), Some("push"));
        assert!(err.to_string().contains("rejected"));
    }

    #[test]
    fn commit_sets_identity_first() {
        let repo = working_copy();
        let runner = Arc::new(ScriptedRunner::default());

        client(repo.path(), None, Arc::clone(&runner))
            .commit("Update w1")
            .unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "config user.email action@automaton.bot",
                "config user.name Automated Action",
                "commit -m Update w1",
            ]
        );
    }

    #[test]
    fn pull_removes_credentials_even_on_failure() {
        let repo = working_copy();
        let runner = Arc::new(ScriptedRunner::default());
        runner.reply("pull", 1, "", "fatal: unable to access remote\n");

        let err = client(repo.path(), Some("tok"), Arc::clone(&runner))
            .pull()
            .unwrap_err();

        assert_eq!(err.command(), Some("pull"));
        assert!(!repo.path().join(".git").join(CREDENTIALS_FILE).exists());
        let calls = runner.calls();
        assert!(calls[0].starts_with("config credential.helper store --file="));
        assert_eq!(calls[1], "pull");
        assert_eq!(calls[2], "config --unset credential.helper");
    }

    #[test]
    fn pull_and_push_treat_up_to_date_as_success() {
        let repo = working_copy();
        let runner = Arc::new(ScriptedRunner::default());
        runner.reply("pull", 0, "Already up to date.\n", "");
        runner.reply("push", 1, "", "Everything up-to-date\n");

        let git = client(repo.path(), Some("tok"), Arc::clone(&runner));
        assert_eq!(git.pull().unwrap(), SyncOutcome::UpToDate);
        assert_eq!(git.push().unwrap(), SyncOutcome::UpToDate);
    }

    #[test]
    fn failed_push_mentioning_up_to_date_is_an_error() {
        let repo = working_copy();
        let runner = Arc::new(ScriptedRunner::default());
        runner.reply(
            "push",
            1,
            "",
            "error: failed to push; local branch is not up to date\n",
        );

        let err = client(repo.path(), None, Arc::clone(&runner))
            .push()
            .unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { code: 1, .. }), "{err}");
    }

    #[test]
    fn unauthenticated_pull_skips_credential_helper() {
        let repo = working_copy();
        let runner = Arc::new(ScriptedRunner::default());

        client(repo.path(), None, Arc::clone(&runner))
            .pull()
            .unwrap();

        assert_eq!(runner.calls(), vec!["pull"]);
    }

    #[test]
    fn clone_is_noop_when_present() {
        let repo = working_copy();
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = client(repo.path(), Some("tok"), Arc::clone(&runner))
            .clone_repo()
            .unwrap();

        assert!(matches!(outcome, CloneOutcome::AlreadyPresent { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn clone_injects_token_then_resets_origin() {
        let tmp = tempfile::TempDir::new().unwrap();
        let repo = tmp.path().join("resources").join("site");
        let runner = Arc::new(ScriptedRunner::default());

        let outcome = client(&repo, Some("tok"), Arc::clone(&runner))
            .clone_repo()
            .unwrap();

        assert_eq!(outcome, CloneOutcome::Cloned { path: repo.clone() });
        assert!(tmp.path().join("resources").is_dir());
        assert_eq!(
            runner.calls(),
            vec![
                "clone https://tok@github.com/acme/site.git site",
                "remote set-url origin https://github.com/acme/site.git",
            ]
        );
    }

    #[test]
    fn operations_require_working_copy() {
        let tmp = tempfile::TempDir::new().unwrap();
        let runner = Arc::new(ScriptedRunner::default());
        let git = client(&tmp.path().join("missing"), None, Arc::clone(&runner));

        assert!(matches!(
            git.add("."),
            Err(GitError::MissingWorkingCopy { .. })
        ));
        assert!(!git.working_copy_exists());
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn debug_output_hides_token() {
        let repo = working_copy();
        let git = client(repo.path(), Some("ghp_secret"), Arc::default());
        assert!(!format!("{git:?}").contains("ghp_secret"));
    }
}
