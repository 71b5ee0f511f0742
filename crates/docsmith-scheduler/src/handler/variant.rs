//! What each kind of job does inside the shared lifecycle.

use docsmith_core::executor::CommandSpec;
use docsmith_core::{DerivedFields, Error, Job, JobPayload, JobType, NewJob, Result};
use std::path::Path;

use super::HandlerSettings;
use crate::validator::Admission;

/// Priority of the search-manifest job queued after a production deploy.
const MANIFEST_FOLLOW_ON_PRIORITY: i32 = 2;

/// Handler behaviour selected by job type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobVariant {
    /// Preview build under the requester's own prefix.
    Staging,
    /// Publish to the live prefix, purge the CDN and queue a manifest job.
    Production,
    /// Build and stage for comparison against the published site.
    Regression,
    /// Regenerate the search manifest for a published branch.
    Manifest,
}

/// Commands a job runs, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandPlan {
    pub build: Vec<CommandSpec>,
    pub deploy: Vec<CommandSpec>,
}

impl CommandPlan {
    pub fn describe(&self) -> Vec<String> {
        self.build
            .iter()
            .chain(&self.deploy)
            .map(CommandSpec::display)
            .collect()
    }
}

impl JobVariant {
    pub fn for_job_type(job_type: JobType) -> Self {
        match job_type {
            JobType::PushBuild => JobVariant::Staging,
            JobType::ProductionDeploy | JobType::CmsPublish => JobVariant::Production,
            JobType::RegressionTest => JobVariant::Regression,
            JobType::ManifestGeneration => JobVariant::Manifest,
        }
    }

    /// Where the deploy phase pushes to; used in failure reasons.
    pub fn deploy_target(&self) -> &'static str {
        match self {
            JobVariant::Staging => "staging",
            JobVariant::Production => "production",
            JobVariant::Regression => "regression",
            JobVariant::Manifest => "search-manifest",
        }
    }

    fn build_targets(&self) -> &'static [&'static str] {
        match self {
            JobVariant::Staging | JobVariant::Regression | JobVariant::Production => {
                &["next-gen-parse", "next-gen-html"]
            }
            JobVariant::Manifest => &["next-gen-parse"],
        }
    }

    fn deploy_targets(&self) -> &'static [&'static str] {
        match self {
            JobVariant::Staging | JobVariant::Regression => &["next-gen-stage"],
            JobVariant::Production => &["next-gen-deploy"],
            JobVariant::Manifest => &["next-gen-manifest"],
        }
    }

    /// Whether the deploy must print a summary for the job to count as published.
    pub fn requires_summary(&self) -> bool {
        matches!(self, JobVariant::Production)
    }

    pub fn purges_cdn(&self) -> bool {
        matches!(self, JobVariant::Production)
    }

    /// Compute the job's publish paths.
    pub fn derive(&self, job: &Job, admission: &Admission) -> Result<DerivedFields> {
        let payload = &job.payload;
        match self {
            JobVariant::Staging => Ok(DerivedFields {
                path_prefix: format!(
                    "{}/{}/{}",
                    payload.repo_name, job.user, payload.branch_name
                ),
                mut_prefix: payload.repo_name.clone(),
                url_slug: payload.branch_name.clone(),
                ..DerivedFields::default()
            }),
            JobVariant::Regression => Ok(DerivedFields {
                path_prefix: format!("{}/regression/{}", payload.repo_name, payload.branch_name),
                mut_prefix: payload.repo_name.clone(),
                url_slug: payload.branch_name.clone(),
                ..DerivedFields::default()
            }),
            JobVariant::Production | JobVariant::Manifest => {
                let target = admission.publish.as_ref().ok_or_else(|| {
                    Error::Authorization(format!(
                        "{} has no publish configuration",
                        payload.repo_name
                    ))
                })?;
                let url_slug = target.branch.url_slug().to_string();
                let prefix = &target.repo.prefix;
                let primary_alias = target.is_primary_alias();
                let path_prefix = if primary_alias {
                    prefix.clone()
                } else {
                    format!("{}/{}", prefix, url_slug)
                };

                Ok(DerivedFields {
                    path_prefix,
                    mut_prefix: prefix.clone(),
                    manifest_prefix: Some(format!("{}-{}", target.repo.project, url_slug)),
                    url_slug,
                    aliased: target.branch.is_aliased(),
                    primary_alias,
                    stable: target.is_stable(),
                    publish_config: Some(target.repo.clone()),
                })
            }
        }
    }

    /// Build the make invocations for this job.
    pub fn commands(
        &self,
        job: &Job,
        derived: &DerivedFields,
        settings: &HandlerSettings,
        repo_dir: &Path,
    ) -> CommandPlan {
        let make = |target: &str| {
            let mut spec = CommandSpec::new(&settings.make)
                .arg(target)
                .current_dir(repo_dir)
                .timeout(settings.command_timeout);
            for (key, value) in self.command_env(job, derived) {
                spec = spec.env(key, value);
            }
            spec
        };

        CommandPlan {
            build: self.build_targets().iter().copied().map(&make).collect(),
            deploy: self.deploy_targets().iter().copied().map(&make).collect(),
        }
    }

    fn command_env(&self, job: &Job, derived: &DerivedFields) -> Vec<(&'static str, String)> {
        let payload = &job.payload;
        let project = derived
            .publish_config
            .as_ref()
            .map_or(payload.repo_name.as_str(), |c| c.project.as_str());

        let mut env = vec![
            ("REPO_NAME", payload.repo_name.clone()),
            ("REPO_OWNER", payload.repo_owner.clone()),
            ("PROJECT", project.to_string()),
            ("GIT_BRANCH", payload.branch_name.clone()),
            ("REQUESTER", job.user.clone()),
            ("PATH_PREFIX", derived.path_prefix.clone()),
            ("MUT_PREFIX", derived.mut_prefix.clone()),
            ("URL_SLUG", derived.url_slug.clone()),
        ];
        if let Some(manifest_prefix) = &derived.manifest_prefix {
            env.push(("MANIFEST_PREFIX", manifest_prefix.clone()));
        }
        if let Some(commit) = &payload.commit {
            env.push(("COMMIT_HASH", commit.clone()));
        }
        if payload.patch.is_some() {
            env.push(("PATCHED", "true".to_string()));
        }
        if derived.stable {
            env.push(("GLOBAL_SEARCH", "true".to_string()));
        }
        if *self == JobVariant::Regression {
            env.push(("REGRESSION", "true".to_string()));
        }
        env
    }

    /// Whether a successful run should queue a search-manifest job.
    ///
    /// Only production publishes do, never for excluded repositories, and for
    /// aliased branches only from the primary alias.
    pub fn should_generate_manifest(
        &self,
        job: &Job,
        derived: &DerivedFields,
        settings: &HandlerSettings,
    ) -> bool {
        *self == JobVariant::Production
            && !settings
                .manifest_excluded_repos
                .iter()
                .any(|r| *r == job.payload.repo_name)
            && (!derived.aliased || derived.primary_alias)
    }
}

/// The search-manifest job queued after `job` publishes.
pub fn manifest_follow_on(job: &Job) -> NewJob {
    let payload = JobPayload {
        job_type: JobType::ManifestGeneration,
        ..job.payload.intent()
    };
    NewJob::new(
        format!("Search manifest generation for {}", job.payload.repo_name),
        job.user.clone(),
        job.email.clone(),
        payload,
    )
    .with_priority(MANIFEST_FOLLOW_ON_PRIORITY)
}
