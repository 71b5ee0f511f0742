//! Admission gate run on every claimed job before any side effect.

use docsmith_core::access::{
    BranchPublishConfig, EntitlementLookup, PublishConfigLookup, RepoPublishConfig,
};
use docsmith_core::{Error, Job, Result};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

/// Characters allowed in names that end up in filesystem paths and URLs.
static SAFE_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+$").expect("safe-token pattern is valid")
});

static COMMIT_HASH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{7,40}$").expect("commit pattern is valid")
});

/// Publish configuration resolved for a publishing job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub repo: RepoPublishConfig,
    pub branch: BranchPublishConfig,
}

impl PublishTarget {
    pub fn is_stable(&self) -> bool {
        self.branch.is_stable_branch
    }

    pub fn is_primary_alias(&self) -> bool {
        self.branch.is_primary_alias()
    }
}

/// What admission learned about a job. Handlers derive their fields from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Admission {
    /// Present for job types that publish to a live prefix.
    pub publish: Option<PublishTarget>,
}

/// Checks job shape, requester entitlement and, for publishing jobs, that
/// the branch is configured for publishing.
pub struct JobValidator {
    entitlements: Arc<dyn EntitlementLookup>,
    publish_configs: Arc<dyn PublishConfigLookup>,
}

impl JobValidator {
    pub fn new(
        entitlements: Arc<dyn EntitlementLookup>,
        publish_configs: Arc<dyn PublishConfigLookup>,
    ) -> Self {
        Self {
            entitlements,
            publish_configs,
        }
    }

    /// Admit `job` or explain why not. Errors are `Validation` or
    /// `Authorization` and are terminal for the job.
    pub async fn admit(&self, job: &Job) -> Result<Admission> {
        check_shape(job)?;
        self.check_entitlement(job).await?;

        if !job.payload.job_type.publishes() {
            return Ok(Admission::default());
        }
        let publish = self.resolve_publish_target(job).await?;
        debug!(
            job_id = %job.id,
            prefix = %publish.repo.prefix,
            stable = publish.is_stable(),
            "Publish target resolved"
        );
        Ok(Admission {
            publish: Some(publish),
        })
    }

    async fn check_entitlement(&self, job: &Job) -> Result<()> {
        let full_name = job.payload.full_repo_name();
        let repos = match self.entitlements.entitled_repos(&job.user).await {
            Ok(repos) => repos,
            Err(e) => {
                warn!(job_id = %job.id, user = %job.user, error = %e, "Entitlement lookup failed");
                return Err(Error::Authorization(format!(
                    "could not verify entitlements for {}: {}",
                    job.user,
                    e.message()
                )));
            }
        };

        match repos {
            None => Err(Error::Authorization(format!(
                "{} has no entitlement record",
                job.user
            ))),
            Some(repos) if repos.iter().any(|r| *r == full_name) => Ok(()),
            Some(_) => Err(Error::Authorization(format!(
                "{} is not entitled to build {}",
                job.user, full_name
            ))),
        }
    }

    async fn resolve_publish_target(&self, job: &Job) -> Result<PublishTarget> {
        let payload = &job.payload;
        let repo = self
            .publish_configs
            .repo_publish_config(&payload.repo_name)
            .await
            .map_err(|e| {
                Error::Authorization(format!(
                    "could not load publish configuration for {}: {}",
                    payload.repo_name,
                    e.message()
                ))
            })?
            .ok_or_else(|| {
                Error::Authorization(format!(
                    "{} is not configured for publishing",
                    payload.repo_name
                ))
            })?;

        let branch = repo
            .published_branch(&payload.branch_name)
            .cloned()
            .ok_or_else(|| {
                Error::Authorization(format!(
                    "{} branch {} is not configured for publishing",
                    payload.repo_name, payload.branch_name
                ))
            })?;

        if !SAFE_TOKEN.is_match(branch.url_slug()) {
            return Err(Error::Validation(format!(
                "url slug {:?} contains unsupported characters",
                branch.url_slug()
            )));
        }

        Ok(PublishTarget { repo, branch })
    }
}

fn check_shape(job: &Job) -> Result<()> {
    let payload = &job.payload;
    for (field, value) in [
        ("repo owner", payload.repo_owner.as_str()),
        ("repo name", payload.repo_name.as_str()),
        ("branch name", payload.branch_name.as_str()),
    ] {
        check_token(field, value)?;
    }
    if job.user.trim().is_empty() {
        return Err(Error::Validation("requester is empty".into()));
    }
    if let Some(commit) = &payload.commit {
        if !COMMIT_HASH.is_match(commit) {
            return Err(Error::Validation(format!("{:?} is not a commit hash", commit)));
        }
    }
    if payload.patch.as_deref().is_some_and(|p| p.trim().is_empty()) {
        return Err(Error::Validation("patch is empty".into()));
    }
    Ok(())
}

fn check_token(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::Validation(format!("{} is empty", field)));
    }
    // "." and ".." pass the character check but escape the workspace.
    if value == "." || value == ".." || !SAFE_TOKEN.is_match(value) {
        return Err(Error::Validation(format!(
            "{} {:?} contains unsupported characters",
            field, value
        )));
    }
    Ok(())
}
