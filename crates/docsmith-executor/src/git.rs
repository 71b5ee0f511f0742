//! Git CLI source-control connector.

use async_trait::async_trait;
use docsmith_core::source::SourceControl;
use docsmith_core::{Error, JobPayload, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{info, warn};

const PATCH_FILE: &str = "docsmith.patch";

/// Git operation errors.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Problems cleaning up directory: {0}")]
    Cleanup(String),

    #[error("git {command} failed: {message}")]
    CommandFailed { command: String, message: String },
}

impl From<GitError> for Error {
    fn from(err: GitError) -> Self {
        Error::SourceControl(err.to_string())
    }
}

/// Source control through the `git` binary. Each repository is checked out
/// under `<work_dir>/<repo_name>`.
pub struct GitCli {
    work_dir: PathBuf,
    /// Token used for private repositories.
    access_token: Option<String>,
}

impl GitCli {
    pub fn new(work_dir: impl Into<PathBuf>, access_token: Option<String>) -> Self {
        Self {
            work_dir: work_dir.into(),
            access_token,
        }
    }

    pub fn repo_path(&self, repo_name: &str) -> PathBuf {
        self.work_dir.join(repo_name)
    }

    /// https://github.com/owner/repo.git -> https://token@github.com/owner/repo.git
    fn authenticated_url(&self, payload: &JobPayload) -> String {
        let url = payload.clone_url();
        match (&self.access_token, payload.private) {
            (Some(token), true) => match url.strip_prefix("https://") {
                Some(rest) => format!("https://{}@{}", token, rest),
                None => url,
            },
            _ => url,
        }
    }

    fn redact(&self, text: &str) -> String {
        match &self.access_token {
            Some(token) if !token.is_empty() => text.replace(token.as_str(), "[REDACTED]"),
            _ => text.to_string(),
        }
    }

    async fn git(&self, dir: &Path, args: &[&str]) -> std::result::Result<String, GitError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Don't log the raw command line, it may contain the token
            warn!(subcommand = args.first().copied().unwrap_or_default(), "Git command failed");
            return Err(GitError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                message: self.redact(stderr.trim()),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl SourceControl for GitCli {
    async fn reset_workspace(&self, repo_name: &str) -> Result<()> {
        let path = self.repo_path(repo_name);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GitError::Cleanup(format!("{}: {}", path.display(), e)).into()),
        }
    }

    async fn clone_repo(&self, payload: &JobPayload) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(GitError::from)?;

        let path = self.repo_path(&payload.repo_name);
        let target = path.to_string_lossy().to_string();
        let url = self.authenticated_url(payload);

        info!(
            repo = %payload.full_repo_name(),
            branch = %payload.branch_name,
            path = %path.display(),
            "Cloning repository"
        );
        self.git(
            &self.work_dir,
            &["clone", "--branch", &payload.branch_name, &url, &target],
        )
        .await?;

        Ok(path)
    }

    async fn checkout_commit(&self, repo_dir: &Path, commit: &str) -> Result<()> {
        self.git(
            repo_dir,
            &["-c", "advice.detachedHead=false", "checkout", commit],
        )
        .await?;
        Ok(())
    }

    async fn pull(&self, repo_dir: &Path, branch: &str) -> Result<()> {
        self.git(repo_dir, &["pull", "--ff-only", "origin", branch])
            .await?;
        Ok(())
    }

    async fn apply_patch(&self, repo_dir: &Path, patch: &str) -> Result<()> {
        let patch_path = repo_dir.join(PATCH_FILE);
        tokio::fs::write(&patch_path, patch)
            .await
            .map_err(GitError::from)?;
        let applied = self.git(repo_dir, &["apply", PATCH_FILE]).await;
        if let Err(e) = tokio::fs::remove_file(&patch_path).await {
            warn!(error = %e, "Failed to remove patch file");
        }
        applied.map(|_| ()).map_err(|e| match e {
            GitError::CommandFailed { message, .. } => {
                Error::SourceControl(format!("Invalid patch: {}", message))
            }
            other => other.into(),
        })
    }

    async fn file_exists(&self, repo_dir: &Path, relative: &str) -> Result<bool> {
        tokio::fs::try_exists(repo_dir.join(relative))
            .await
            .map_err(|e| GitError::from(e).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsmith_core::JobType;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("docsmith-git-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_token_only_used_for_private_repos() {
        let git = GitCli::new("/tmp/work", Some("s3cret".into()));
        let mut payload = JobPayload::new(JobType::PushBuild, "mongodb", "docs", "main");

        assert_eq!(
            git.authenticated_url(&payload),
            "https://github.com/mongodb/docs.git"
        );

        payload.private = true;
        assert_eq!(
            git.authenticated_url(&payload),
            "https://s3cret@github.com/mongodb/docs.git"
        );
    }

    #[test]
    fn test_redacts_token() {
        let git = GitCli::new("/tmp/work", Some("s3cret".into()));
        assert_eq!(
            git.redact("fatal: could not read from https://s3cret@github.com"),
            "fatal: could not read from https://[REDACTED]@github.com"
        );

        let anonymous = GitCli::new("/tmp/work", None);
        assert_eq!(anonymous.redact("unchanged"), "unchanged");
    }

    #[tokio::test]
    async fn test_reset_workspace_removes_checkout() {
        let work_dir = scratch_dir();
        let git = GitCli::new(&work_dir, None);
        let checkout = git.repo_path("docs");
        tokio::fs::create_dir_all(checkout.join("source")).await.unwrap();
        tokio::fs::write(checkout.join("Makefile"), "all:\n").await.unwrap();

        assert!(git.file_exists(&checkout, "Makefile").await.unwrap());
        git.reset_workspace("docs").await.unwrap();
        assert!(!checkout.exists());

        // Resetting an absent checkout is fine.
        git.reset_workspace("docs").await.unwrap();
        let _ = tokio::fs::remove_dir_all(&work_dir).await;
    }

    #[test]
    fn test_git_error_maps_to_source_control() {
        let err: Error = GitError::CommandFailed {
            command: "clone".into(),
            message: "repository not found".into(),
        }
        .into();
        assert!(matches!(err, Error::SourceControl(_)));
        assert!(err.is_retryable());
    }
}
