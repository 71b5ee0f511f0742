//! Entitlement and publish-configuration lookups.
//!
//! Both records are owned by an external admin workflow; the orchestrator
//! only reads them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// How one branch of a repository is published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchPublishConfig {
    pub git_branch_name: String,
    pub active: bool,
    /// Path segment the branch is served under; defaults to the branch name.
    pub url_slug: Option<String>,
    #[serde(default)]
    pub url_aliases: Vec<String>,
    #[serde(default)]
    pub is_stable_branch: bool,
}

impl BranchPublishConfig {
    pub fn new(git_branch_name: impl Into<String>) -> Self {
        Self {
            git_branch_name: git_branch_name.into(),
            active: true,
            url_slug: None,
            url_aliases: Vec::new(),
            is_stable_branch: false,
        }
    }

    pub fn url_slug(&self) -> &str {
        self.url_slug.as_deref().unwrap_or(&self.git_branch_name)
    }

    pub fn is_aliased(&self) -> bool {
        !self.url_aliases.is_empty()
    }

    /// An aliased branch whose slug is itself one of its aliases is served
    /// at the project root.
    pub fn is_primary_alias(&self) -> bool {
        self.is_aliased() && self.url_aliases.iter().any(|a| a == self.url_slug())
    }
}

/// Publish configuration for one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPublishConfig {
    pub repo_name: String,
    /// Search/project name.
    pub project: String,
    /// Live URL prefix the project is published under.
    pub prefix: String,
    pub branches: Vec<BranchPublishConfig>,
}

impl RepoPublishConfig {
    /// The active configuration for `branch`, if it is published.
    pub fn published_branch(&self, branch: &str) -> Option<&BranchPublishConfig> {
        self.branches
            .iter()
            .find(|b| b.git_branch_name == branch && b.active)
    }
}

/// Maps a requesting identity to the repositories it may build.
#[async_trait]
pub trait EntitlementLookup: Send + Sync {
    /// `owner/repo` names the user may build, or `None` when no record exists.
    async fn entitled_repos(&self, user: &str) -> Result<Option<Vec<String>>>;
}

/// Fetches branch publish configuration.
#[async_trait]
pub trait PublishConfigLookup: Send + Sync {
    async fn repo_publish_config(&self, repo_name: &str) -> Result<Option<RepoPublishConfig>>;
}
