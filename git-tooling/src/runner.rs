//! Process execution for git commands.

use std::path::Path;
use std::process::Command;

use crate::GitError;

/// Captured result of one `git` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    /// Exit code, or `-1` when the process was killed by a signal.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// The most useful diagnostic text: stderr, falling back to stdout.
    pub fn detail(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs a git command in a directory.
///
/// The client talks to git only through this trait so tests can script
/// command outcomes without a real repository.
pub trait GitRunner: Send + Sync {
    fn run(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError>;
}

/// Spawns the real `git` binary.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl ProcessRunner {
    /// Use a specific git executable instead of the one on `PATH`.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl GitRunner for ProcessRunner {
    fn run(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput, GitError> {
        let printable = args
            .iter()
            .map(|arg| redact_arg(arg))
            .collect::<Vec<_>>()
            .join(" ");
        tracing::debug!("running git {printable} in {}", cwd.display());

        // Benign-outcome detection matches on English output.
        let output = Command::new(&self.program)
            .args(args)
            .current_dir(cwd)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|source| GitError::Spawn {
                command: args.first().copied().unwrap_or("").to_string(),
                source,
            })?;

        let result = GitOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if result.success() {
            tracing::debug!("git {printable} ok");
        } else {
            tracing::debug!("git {printable} exited {}: {}", result.code, result.detail());
        }
        Ok(result)
    }
}

/// Hide userinfo in URL arguments so tokens never reach the logs.
pub fn redact_arg(arg: &str) -> String {
    if !arg.contains("://") {
        return arg.to_string();
    }
    match url::Url::parse(arg) {
        Ok(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            let _ = parsed.set_password(None);
            let _ = parsed.set_username("***");
            parsed.to_string()
        }
        _ => arg.to_string(),
    }
}
