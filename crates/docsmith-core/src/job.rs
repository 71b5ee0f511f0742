//! The job document: the unit of work flowing through the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::access::RepoPublishConfig;
use crate::{Error, JobId};

/// Number of failed attempts after which a job is permanently failed.
pub const MAX_FAILURES: i32 = 3;

/// Kind of work a job asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    PushBuild,
    ProductionDeploy,
    RegressionTest,
    ManifestGeneration,
    CmsPublish,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::PushBuild => "push-build",
            JobType::ProductionDeploy => "production-deploy",
            JobType::RegressionTest => "regression-test",
            JobType::ManifestGeneration => "manifest-generation",
            JobType::CmsPublish => "cms-publish",
        }
    }

    /// Whether jobs of this type publish to a live prefix and therefore
    /// need a branch publish configuration.
    pub fn publishes(&self) -> bool {
        matches!(
            self,
            JobType::ProductionDeploy | JobType::CmsPublish | JobType::ManifestGeneration
        )
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push-build" => Ok(JobType::PushBuild),
            "production-deploy" => Ok(JobType::ProductionDeploy),
            "regression-test" => Ok(JobType::RegressionTest),
            "manifest-generation" => Ok(JobType::ManifestGeneration),
            "cms-publish" => Ok(JobType::CmsPublish),
            other => Err(Error::Validation(format!("unrecognized job type: {}", other))),
        }
    }
}

/// Lifecycle status of a job document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "in-progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "in-progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Internal(format!("unknown job status: {}", other))),
        }
    }
}

/// Rough size of the documentation project, used to pick worker capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    #[default]
    Standard,
    Large,
}

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub time: DateTime<Utc>,
    pub reason: String,
}

/// Fields computed by the handler while preparing a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedFields {
    /// Path the site is published under.
    pub path_prefix: String,
    /// Mutable (project-level) publish prefix.
    pub mut_prefix: String,
    /// Name of the search manifest, for jobs that produce one.
    pub manifest_prefix: Option<String>,
    pub url_slug: String,
    pub aliased: bool,
    pub primary_alias: bool,
    /// Whether this is the canonical stable branch (refreshes global search).
    pub stable: bool,
    pub publish_config: Option<RepoPublishConfig>,
}

/// What a job asks to build, plus the fields derived while running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_type: JobType,
    /// Origin of the request (e.g. "github", "slack", "cms").
    pub source: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub branch_name: String,
    #[serde(default)]
    pub is_fork: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub size_class: SizeClass,
    pub commit: Option<String>,
    pub patch: Option<String>,
    /// Never persisted by the queue; recomputed on every attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived: Option<DerivedFields>,
}

impl JobPayload {
    pub fn new(
        job_type: JobType,
        repo_owner: impl Into<String>,
        repo_name: impl Into<String>,
        branch_name: impl Into<String>,
    ) -> Self {
        Self {
            job_type,
            source: "github".to_string(),
            repo_owner: repo_owner.into(),
            repo_name: repo_name.into(),
            branch_name: branch_name.into(),
            is_fork: false,
            private: false,
            size_class: SizeClass::default(),
            commit: None,
            patch: None,
            derived: None,
        }
    }

    /// `owner/repo`, the form entitlement records use.
    pub fn full_repo_name(&self) -> String {
        format!("{}/{}", self.repo_owner, self.repo_name)
    }

    pub fn clone_url(&self) -> String {
        format!(
            "https://github.com/{}/{}.git",
            self.repo_owner, self.repo_name
        )
    }

    /// The payload as it was admitted, without derived fields.
    pub fn intent(&self) -> JobPayload {
        JobPayload {
            derived: None,
            ..self.clone()
        }
    }
}

/// Artifact summary recorded on successful completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub deploy_target: String,
    pub summary: Option<String>,
    #[serde(default)]
    pub purged_urls: Vec<String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

/// A job document as held by the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub title: String,
    pub user: String,
    pub email: String,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub priority: i32,
    pub created_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub failure_count: i32,
    pub failures: Vec<FailureRecord>,
    pub logs: Vec<String>,
    pub notifications: Vec<String>,
    pub purged_urls: Vec<String>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl Job {
    /// Whether a claim at `now` may pick this job up.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Queued && self.created_time <= now
    }

    pub fn derived(&self) -> Option<&DerivedFields> {
        self.payload.derived.as_ref()
    }
}

/// A job as submitted by an admission path, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJob {
    pub title: String,
    pub user: String,
    pub email: String,
    pub payload: JobPayload,
    pub priority: i32,
    /// Defaults to the insertion time; a future time delays the job.
    pub created_time: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(
        title: impl Into<String>,
        user: impl Into<String>,
        email: impl Into<String>,
        payload: JobPayload,
    ) -> Self {
        Self {
            title: title.into(),
            user: user.into(),
            email: email.into(),
            payload,
            priority: 1,
            created_time: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_created_time(mut self, created_time: DateTime<Utc>) -> Self {
        self.created_time = Some(created_time);
        self
    }

    /// Materialize the stored document.
    pub fn into_job(self, id: JobId, now: DateTime<Utc>) -> Job {
        Job {
            id,
            title: self.title,
            user: self.user,
            email: self.email,
            payload: self.payload.intent(),
            status: JobStatus::Queued,
            priority: self.priority,
            created_time: self.created_time.unwrap_or(now),
            start_time: None,
            end_time: None,
            failure_count: 0,
            failures: Vec::new(),
            logs: Vec::new(),
            notifications: Vec::new(),
            purged_urls: Vec::new(),
            result: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_job_type_round_trips_through_str() {
        for ty in [
            JobType::PushBuild,
            JobType::ProductionDeploy,
            JobType::RegressionTest,
            JobType::ManifestGeneration,
            JobType::CmsPublish,
        ] {
            assert_eq!(ty.as_str().parse::<JobType>().unwrap(), ty);
        }
        assert!(matches!(
            "deploy-everything".parse::<JobType>(),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_job_type_serializes_kebab_case() {
        let json = serde_json::to_string(&JobType::ManifestGeneration).unwrap();
        assert_eq!(json, "\"manifest-generation\"");
        let status = serde_json::to_string(&JobStatus::InProgress).unwrap();
        assert_eq!(status, "\"in-progress\"");
    }

    #[test]
    fn test_publishing_job_types() {
        assert!(JobType::ProductionDeploy.publishes());
        assert!(JobType::CmsPublish.publishes());
        assert!(JobType::ManifestGeneration.publishes());
        assert!(!JobType::PushBuild.publishes());
        assert!(!JobType::RegressionTest.publishes());
    }

    #[test]
    fn test_new_job_drops_derived_fields() {
        let mut payload = JobPayload::new(JobType::PushBuild, "mongodb", "docs", "main");
        payload.derived = Some(DerivedFields::default());
        let now = Utc::now();
        let job = NewJob::new("build", "alice", "alice@example.com", payload).into_job(JobId::new(), now);

        assert!(job.payload.derived.is_none());
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.created_time, now);
        assert_eq!(job.failure_count, 0);
    }

    #[test]
    fn test_future_job_is_not_claimable() {
        let now = Utc::now();
        let payload = JobPayload::new(JobType::PushBuild, "mongodb", "docs", "main");
        let job = NewJob::new("build", "alice", "alice@example.com", payload)
            .with_created_time(now + Duration::hours(1))
            .into_job(JobId::new(), now);

        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + Duration::hours(2)));
    }

    #[test]
    fn test_full_repo_name() {
        let payload = JobPayload::new(JobType::PushBuild, "mongodb", "docs-atlas", "v1.0");
        assert_eq!(payload.full_repo_name(), "mongodb/docs-atlas");
        assert_eq!(payload.clone_url(), "https://github.com/mongodb/docs-atlas.git");
    }
}
