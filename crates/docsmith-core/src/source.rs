//! Source-control connector trait.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::{JobPayload, Result};

/// Acquires and prepares the documentation source for a job.
///
/// Every method fails with `Error::SourceControl` on a git-level failure.
#[async_trait]
pub trait SourceControl: Send + Sync {
    /// Remove any previous checkout of `repo_name` from the workspace.
    async fn reset_workspace(&self, repo_name: &str) -> Result<()>;

    /// Clone the payload's repository and branch; returns the checkout path.
    async fn clone_repo(&self, payload: &JobPayload) -> Result<PathBuf>;

    async fn checkout_commit(&self, repo_dir: &Path, commit: &str) -> Result<()>;

    async fn pull(&self, repo_dir: &Path, branch: &str) -> Result<()>;

    async fn apply_patch(&self, repo_dir: &Path, patch: &str) -> Result<()>;

    async fn file_exists(&self, repo_dir: &Path, relative: &str) -> Result<bool>;
}
