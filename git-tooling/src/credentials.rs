//! Short-lived credential store for authenticated git operations.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{GitError, GitRunner};

/// File name of the temporary credential store inside `.git/`.
pub(crate) const CREDENTIALS_FILE: &str = ".git-credentials-temp";

/// Credentials configured for the lifetime of this value.
///
/// Construction writes the credential file and points `credential.helper`
/// at it; dropping the scope deletes the file and unsets the helper, on every
/// exit path.
pub(crate) struct CredentialScope<'a> {
    runner: &'a dyn GitRunner,
    repo: &'a Path,
    file: PathBuf,
}

impl<'a> CredentialScope<'a> {
    pub(crate) fn acquire(
        runner: &'a dyn GitRunner,
        repo: &'a Path,
        remote_url: &str,
        token: &str,
    ) -> Result<Self, GitError> {
        let line = credential_line(remote_url, token)?;
        // git runs the helper from inside the working copy, so a relative
        // `--file` would resolve against the repo a second time.
        let file = std::path::absolute(repo.join(".git").join(CREDENTIALS_FILE))
            .map_err(|e| GitError::Credentials(format!("resolve {}: {e}", repo.display())))?;

        write_private(&file, &line)
            .map_err(|e| GitError::Credentials(format!("write {}: {e}", file.display())))?;

        // From here on Drop cleans up, including when the config call fails.
        let scope = Self { runner, repo, file };

        let helper = format!("store --file={}", scope.file.display());
        let output = runner.run(repo, &["config", "credential.helper", &helper])?;
        if !output.success() {
            return Err(GitError::Credentials(format!(
                "set credential.helper: {}",
                output.detail()
            )));
        }

        tracing::debug!("credentials configured for {}", repo.display());
        Ok(scope)
    }
}

impl Drop for CredentialScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.file)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("failed to remove credential file {}: {e}", self.file.display());
        }

        // Exit code 5 means the key was already unset.
        match self
            .runner
            .run(self.repo, &["config", "--unset", "credential.helper"])
        {
            Ok(output) if output.success() || output.code == 5 => {}
            Ok(output) => {
                tracing::warn!("failed to unset credential.helper: {}", output.detail());
            }
            Err(e) => tracing::warn!("failed to unset credential.helper: {e}"),
        }
        tracing::debug!("credentials removed for {}", self.repo.display());
    }
}

/// Build the `git-credential-store` line for the remote's host. The token is
/// percent-encoded like any other URL userinfo.
fn credential_line(remote_url: &str, token: &str) -> Result<String, GitError> {
    let mut parsed =
        url::Url::parse(remote_url).map_err(|e| GitError::InvalidRemote(format!("{e}")))?;
    if parsed.host_str().is_none() {
        return Err(GitError::InvalidRemote(format!(
            "no host in {}",
            parsed.scheme()
        )));
    }
    parsed.set_path("");
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed
        .set_username(&token.replace('%', "%25"))
        .and_then(|()| parsed.set_password(Some("x-oauth-basic")))
        .map_err(|()| GitError::InvalidRemote(format!("cannot add credentials to {remote_url}")))?;
    let line = parsed.to_string();
    Ok(format!("{}\n", line.trim_end_matches('/')))
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    fs::write(path, contents)
}
