//! Test doubles for the handler and worker tests.

use async_trait::async_trait;
use docsmith_cdn::CdnInvalidator;
use docsmith_config::PurgeMode;
use docsmith_core::access::{BranchPublishConfig, RepoPublishConfig};
use docsmith_core::edge::EdgeClient;
use docsmith_core::executor::{CommandOutput, CommandRunner, CommandSpec};
use docsmith_core::notify::Notifier;
use docsmith_core::source::SourceControl;
use docsmith_core::{Error, Job, JobPayload, JobType, NewJob, Result};
use docsmith_db::{MemoryAccessStore, MemoryJobStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::handler::{HandlerContext, HandlerSettings};
use crate::queue::JobQueue;
use crate::validator::JobValidator;

/// Command runner answering by make target. Unscripted targets succeed.
#[derive(Default)]
pub struct FakeRunner {
    responses: Mutex<HashMap<String, Result<CommandOutput>>>,
    pub ran: Mutex<Vec<CommandSpec>>,
    pub delay: Option<Duration>,
}

impl FakeRunner {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn respond(&self, target: &str, response: Result<CommandOutput>) {
        self.responses
            .lock()
            .unwrap()
            .insert(target.to_string(), response);
    }

    pub fn succeed_with(&self, target: &str, stdout: &str) {
        self.respond(
            target,
            Ok(CommandOutput {
                exit_code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            }),
        );
    }

    pub fn fail_with(&self, target: &str, stderr: &str) {
        self.respond(
            target,
            Ok(CommandOutput {
                exit_code: Some(2),
                stdout: String::new(),
                stderr: stderr.to_string(),
            }),
        );
    }

    pub fn targets(&self) -> Vec<String> {
        self.ran
            .lock()
            .unwrap()
            .iter()
            .filter_map(|spec| spec.args.first().cloned())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.ran.lock().unwrap().push(spec.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let target = spec.args.first().cloned().unwrap_or_default();
        let scripted = self.responses.lock().unwrap().get(&target).cloned();
        scripted.unwrap_or_else(|| {
            Ok(CommandOutput {
                exit_code: Some(0),
                stdout: format!("{} done\nSummary: ok", target),
                stderr: String::new(),
            })
        })
    }
}

/// Source control that records calls and fails the named operations.
#[derive(Default)]
pub struct FakeSource {
    pub failing: Vec<&'static str>,
    pub missing_makefile: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn failing(op: &'static str) -> Self {
        Self {
            failing: vec![op],
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, op: &'static str, detail: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("{} {}", op, detail));
        if self.failing.contains(&op) {
            return Err(Error::SourceControl(format!("{} failed", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceControl for FakeSource {
    async fn reset_workspace(&self, repo_name: &str) -> Result<()> {
        self.record("reset", repo_name)
    }

    async fn clone_repo(&self, payload: &JobPayload) -> Result<PathBuf> {
        self.record("clone", &payload.repo_name)?;
        Ok(PathBuf::from("/work").join(&payload.repo_name))
    }

    async fn checkout_commit(&self, _repo_dir: &Path, commit: &str) -> Result<()> {
        self.record("checkout", commit)
    }

    async fn pull(&self, _repo_dir: &Path, branch: &str) -> Result<()> {
        self.record("pull", branch)
    }

    async fn apply_patch(&self, _repo_dir: &Path, _patch: &str) -> Result<()> {
        self.record("patch", "")
    }

    async fn file_exists(&self, _repo_dir: &Path, relative: &str) -> Result<bool> {
        self.record("exists", relative)?;
        Ok(!self.missing_makefile)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn notify(&self, _job: &Job, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

/// Edge that accepts everything and records purged keys.
#[derive(Default)]
pub struct RecordingEdge {
    pub purged: Mutex<Vec<String>>,
}

#[async_trait]
impl EdgeClient for RecordingEdge {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn surrogate_key(&self, url: &str) -> Result<String> {
        Ok(format!("key:{}", url))
    }

    async fn purge_key(&self, surrogate_key: &str) -> Result<()> {
        self.purged.lock().unwrap().push(surrogate_key.to_string());
        Ok(())
    }

    async fn warm(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn purge_scope(&self, scope: &str) -> Result<()> {
        self.purged.lock().unwrap().push(scope.to_string());
        Ok(())
    }
}

/// Everything a handler or worker test needs, over in-memory stores.
pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub queue: Arc<JobQueue>,
    pub runner: Arc<FakeRunner>,
    pub source: Arc<FakeSource>,
    pub notifier: Arc<RecordingNotifier>,
    pub edge: Arc<RecordingEdge>,
}

impl Harness {
    pub fn new(runner: FakeRunner, source: FakeSource) -> Self {
        let store = Arc::new(MemoryJobStore::new());
        Self {
            queue: Arc::new(JobQueue::new(store.clone(), Duration::from_secs(5))),
            store,
            runner: Arc::new(runner),
            source: Arc::new(source),
            notifier: Arc::new(RecordingNotifier::default()),
            edge: Arc::new(RecordingEdge::default()),
        }
    }

    pub fn settings() -> HandlerSettings {
        HandlerSettings {
            make: "make".into(),
            command_timeout: Duration::from_secs(60),
            manifest_excluded_repos: vec!["docs-landing".into()],
        }
    }

    pub fn context(&self) -> Arc<HandlerContext> {
        Arc::new(HandlerContext {
            queue: self.queue.clone(),
            runner: self.runner.clone(),
            source: self.source.clone(),
            notifier: self.notifier.clone(),
            cdn: Some(Arc::new(CdnInvalidator::new(
                self.edge.clone(),
                PurgeMode::Urls,
            ))),
            settings: Self::settings(),
        })
    }

    pub fn validator(&self) -> Arc<JobValidator> {
        let access = Arc::new(access_store());
        Arc::new(JobValidator::new(access.clone(), access))
    }

    /// Queue a job and claim it.
    pub async fn claimed(&self, job: NewJob) -> Job {
        self.queue.insert_job(job).await.unwrap();
        self.queue.claim_next().await.unwrap().unwrap()
    }
}

pub fn new_job(job_type: JobType, repo: &str, branch: &str) -> NewJob {
    let payload = JobPayload::new(job_type, "mongodb", repo, branch);
    NewJob::new(
        format!("{} {}", job_type, repo),
        "alice",
        "alice@example.com",
        payload,
    )
}

/// Entitlements for alice plus publish configuration for `docs`:
/// `v7.0` is the stable primary alias, `v6.0` an aliased non-primary
/// branch, `master` a plain branch.
pub fn access_store() -> MemoryAccessStore {
    let mut stable = BranchPublishConfig::new("v7.0");
    stable.url_slug = Some("current".into());
    stable.url_aliases = vec!["current".into(), "v7.0".into()];
    stable.is_stable_branch = true;

    let mut legacy = BranchPublishConfig::new("v6.0");
    legacy.url_aliases = vec!["legacy".into()];

    MemoryAccessStore::new()
        .with_entitlement(
            "alice",
            ["mongodb/docs", "mongodb/docs-landing", "mongodb/docs-atlas"],
        )
        .with_repo(RepoPublishConfig {
            repo_name: "docs".into(),
            project: "server".into(),
            prefix: "docs".into(),
            branches: vec![stable, legacy, BranchPublishConfig::new("master")],
        })
        .with_repo(RepoPublishConfig {
            repo_name: "docs-landing".into(),
            project: "landing".into(),
            prefix: "landing".into(),
            branches: vec![BranchPublishConfig::new("master")],
        })
}
