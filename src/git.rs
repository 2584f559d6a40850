//! Thin async wrapper around the `git` binary.
//!
//! Every command runs in one working directory under a timeout. A command
//! that outlives the timeout is killed and reported as
//! [`PatchError::Timeout`]; a non-zero exit becomes [`PatchError::Git`]
//! carrying the trimmed stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::PatchError;

/// Runs git commands inside one working copy.
pub struct GitRunner {
    dir: PathBuf,
    timeout: Duration,
    /// Argument values replaced by a placeholder in logs and errors.
    secrets: Vec<String>,
}

impl GitRunner {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
            secrets: Vec::new(),
        }
    }

    /// Never echo `value` (e.g. a URL carrying a token) in logs or errors.
    pub fn redact(&mut self, value: impl Into<String>) {
        self.secrets.push(value.into());
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn display(&self, args: &[&str]) -> String {
        let shown: Vec<&str> = args
            .iter()
            .map(|a| if self.secrets.iter().any(|s| s == a) { "<redacted>" } else { *a })
            .collect();
        format!("git {}", shown.join(" "))
    }

    fn scrub(&self, text: &str) -> String {
        self.secrets
            .iter()
            .filter(|s| !s.is_empty())
            .fold(text.to_string(), |acc, s| acc.replace(s.as_str(), "<redacted>"))
    }

    /// Run `git <args>` and return its trimmed stdout.
    pub async fn run(&self, args: &[&str]) -> Result<String, PatchError> {
        let command = self.display(args);
        debug!(%command, dir = %self.dir.display(), "running git");

        let mut cmd = Command::new("git");
        cmd.args(args)
            .current_dir(&self.dir)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => {
                error!(%command, secs = self.timeout.as_secs(), "git command timed out");
                return Err(PatchError::Timeout {
                    command,
                    secs: self.timeout.as_secs(),
                });
            }
            Ok(Err(e)) => {
                return Err(PatchError::Git {
                    command,
                    stderr: format!("failed to execute git: {}. Is git installed?", e),
                })
            }
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stderr = self.scrub(String::from_utf8_lossy(&output.stderr).trim());
            error!(%command, %stderr, "git command failed");
            return Err(PatchError::Git { command, stderr });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}
