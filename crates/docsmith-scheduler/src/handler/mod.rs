//! Job handlers: drive one claimed job through its execution lifecycle.
//!
//! Every job runs the same fixed sequence of phases; the job type only
//! changes what happens inside each phase (see [`JobVariant`]).
//!
//! | Phase       | Does                                        | On failure                  |
//! |-------------|---------------------------------------------|-----------------------------|
//! | preparing   | reset workspace, clone, checkout, patch     | requeue or fail at limit    |
//! | building    | run the build targets                       | requeue or fail at limit    |
//! | publishing  | run the deploy targets, post-deploy hooks   | fail                        |
//! | finalizing  | record the result                           |                             |
//!
//! The workspace is reset after every execution, whatever the outcome.
//! Once a handler is stopped it makes no further phase transitions and
//! leaves the job document's status to whoever stopped it.

mod output;
mod variant;

pub use output::{changed_urls, deploy_failure_reason, summary};
pub use variant::{CommandPlan, JobVariant, manifest_follow_on};

use docsmith_cdn::CdnInvalidator;
use docsmith_config::{PurgeMode, WorkerConfig};
use docsmith_core::executor::{CommandOutput, CommandRunner, CommandSpec};
use docsmith_core::notify::Notifier;
use docsmith_core::source::SourceControl;
use docsmith_core::{DerivedFields, Error, Job, JobResult, JobStatus, Result};
use docsmith_db::InsertOutcome;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::queue::JobQueue;
use crate::validator::Admission;

/// Execution phase of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    Preparing,
    Building,
    Publishing,
    Finalizing,
    Done,
    Errored,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Created => "created",
            Phase::Preparing => "preparing",
            Phase::Building => "building",
            Phase::Publishing => "publishing",
            Phase::Finalizing => "finalizing",
            Phase::Done => "done",
            Phase::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Shared stop flag. Cloned into the worker so it can stop a running handler.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSettings {
    /// Program invoked for build and deploy targets.
    pub make: String,
    pub command_timeout: Duration,
    /// Repositories that never get a search manifest.
    pub manifest_excluded_repos: Vec<String>,
}

impl HandlerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            make: config.commands.make.clone(),
            command_timeout: config.commands.timeout,
            manifest_excluded_repos: config.manifest.excluded_repos.clone(),
        }
    }
}

/// Collaborators every handler uses.
pub struct HandlerContext {
    pub queue: Arc<JobQueue>,
    pub runner: Arc<dyn CommandRunner>,
    pub source: Arc<dyn SourceControl>,
    pub notifier: Arc<dyn Notifier>,
    /// `None` when no CDN is configured; invalidation is skipped.
    pub cdn: Option<Arc<CdnInvalidator>>,
    pub settings: HandlerSettings,
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Completed(JobResult),
    /// The attempt failed and the job went back on the queue.
    Requeued { reason: String },
    /// The job was permanently failed.
    Failed { reason: String },
    /// The handler was stopped; the job document was left alone.
    Stopped { phase: Phase },
}

/// Runs one claimed job.
pub struct JobHandler {
    job: Job,
    admission: Admission,
    variant: JobVariant,
    ctx: Arc<HandlerContext>,
    stop: StopHandle,
    phase: Phase,
    repo_dir: Option<PathBuf>,
}

impl JobHandler {
    pub fn new(job: Job, admission: Admission, ctx: Arc<HandlerContext>, stop: StopHandle) -> Self {
        let variant = JobVariant::for_job_type(job.payload.job_type);
        Self {
            job,
            admission,
            variant,
            ctx,
            stop,
            phase: Phase::Created,
            repo_dir: None,
        }
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn variant(&self) -> JobVariant {
        self.variant
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Run the job to an outcome.
    ///
    /// Job failures are reported as outcomes; `Err` means the job store could
    /// not record the outcome, or the handler was already stopped or used.
    pub async fn execute(&mut self) -> Result<ExecutionOutcome> {
        self.ensure_running()?;
        if self.phase != Phase::Created {
            return Err(Error::InvalidState(format!(
                "{} has already been executed",
                self.job.id
            )));
        }

        info!(
            job_id = %self.job.id,
            job_type = %self.job.payload.job_type,
            repo = %self.job.payload.full_repo_name(),
            branch = %self.job.payload.branch_name,
            attempt = self.job.failure_count + 1,
            "Executing job"
        );

        let outcome = self.run_phases().await;
        self.cleanup().await;

        match &outcome {
            Ok(ExecutionOutcome::Completed(_)) => info!(job_id = %self.job.id, "Job completed"),
            Ok(ExecutionOutcome::Requeued { reason }) => {
                info!(job_id = %self.job.id, %reason, "Job requeued")
            }
            Ok(ExecutionOutcome::Failed { reason }) => {
                warn!(job_id = %self.job.id, %reason, "Job failed")
            }
            Ok(ExecutionOutcome::Stopped { phase }) => {
                info!(job_id = %self.job.id, %phase, "Job execution stopped")
            }
            Err(e) => warn!(job_id = %self.job.id, error = %e, "Job outcome not recorded"),
        }
        outcome
    }

    async fn run_phases(&mut self) -> Result<ExecutionOutcome> {
        if !self.enter(Phase::Preparing) {
            return Ok(self.stopped());
        }
        let plan = match self.prepare().await {
            Ok(plan) => plan,
            Err(e) => return self.attempt_failed(e).await,
        };

        if !self.enter(Phase::Building) {
            return Ok(self.stopped());
        }
        if let Err(e) = self.build(&plan).await {
            return self.attempt_failed(e).await;
        }

        if !self.enter(Phase::Publishing) {
            return Ok(self.stopped());
        }
        let result = match self.publish(&plan).await {
            Ok(result) => result,
            Err(e) => return self.give_up(e).await,
        };

        if !self.enter(Phase::Finalizing) {
            return Ok(self.stopped());
        }
        self.ctx
            .queue
            .complete_with_result(self.job.id, result.clone())
            .await?;
        self.phase = Phase::Done;
        self.notify(&format!(
            "{} for {} ({}) finished",
            self.job.payload.job_type,
            self.job.payload.full_repo_name(),
            self.job.payload.branch_name
        ))
        .await;
        Ok(ExecutionOutcome::Completed(result))
    }

    /// Move to `phase` unless stopped.
    fn enter(&mut self, phase: Phase) -> bool {
        if self.stop.is_stopped() {
            return false;
        }
        debug!(job_id = %self.job.id, from = %self.phase, to = %phase, "Phase transition");
        self.phase = phase;
        true
    }

    fn ensure_running(&self) -> Result<()> {
        if self.stop.is_stopped() {
            return Err(Error::InvalidState(format!("{} is stopped", self.job.id)));
        }
        Ok(())
    }

    fn stopped(&self) -> ExecutionOutcome {
        ExecutionOutcome::Stopped { phase: self.phase }
    }

    fn derived(&self) -> Result<&DerivedFields> {
        self.job
            .derived()
            .ok_or_else(|| Error::Internal(format!("{} has no derived fields", self.job.id)))
    }

    async fn prepare(&mut self) -> Result<CommandPlan> {
        let derived = self.variant.derive(&self.job, &self.admission)?;
        self.job.payload.derived = Some(derived);

        let repo_name = self.job.payload.repo_name.clone();
        self.ctx
            .source
            .reset_workspace(&repo_name)
            .await
            .map_err(|e| Error::SourceControl(e.message().to_string()))?;

        self.log(format!(
            "Cloning {} ({})",
            self.job.payload.full_repo_name(),
            self.job.payload.branch_name
        ))
        .await;
        let repo_dir = self.ctx.source.clone_repo(&self.job.payload).await?;
        self.repo_dir = Some(repo_dir.clone());
        self.ctx
            .source
            .pull(&repo_dir, &self.job.payload.branch_name)
            .await?;

        if let Some(commit) = &self.job.payload.commit {
            self.ctx.source.checkout_commit(&repo_dir, commit).await?;
            self.log(format!("Checked out {}", commit)).await;
        }
        if let Some(patch) = &self.job.payload.patch {
            self.ctx.source.apply_patch(&repo_dir, patch).await?;
            self.log("Applied patch").await;
        }
        if !self.ctx.source.file_exists(&repo_dir, "Makefile").await? {
            return Err(Error::Build(format!("no Makefile in {}", repo_name)));
        }

        let derived = self.derived()?;
        Ok(self
            .variant
            .commands(&self.job, derived, &self.ctx.settings, &repo_dir))
    }

    async fn build(&self, plan: &CommandPlan) -> Result<()> {
        for spec in &plan.build {
            self.ensure_running()?;
            let output = self.run_command(spec).await.map_err(|e| match e {
                Error::Timeout(_) => e,
                other => Error::Build(other.message().to_string()),
            })?;
            if !output.success() {
                return Err(Error::Build(failure_text(spec, &output)));
            }
        }
        Ok(())
    }

    async fn publish(&self, plan: &CommandPlan) -> Result<JobResult> {
        let mut stdout = String::new();
        for spec in &plan.deploy {
            self.ensure_running()?;
            let output = self
                .run_command(spec)
                .await
                .map_err(|e| Error::Deploy(e.message().to_string()))?;
            if !output.success() {
                return Err(Error::Deploy(failure_text(spec, &output)));
            }
            if let Some(reported) = output::deploy_error(&output.stderr) {
                return Err(Error::Deploy(reported.to_string()));
            }
            stdout.push_str(&output.stdout);
        }

        let summary = output::summary(&stdout).map(str::to_string);
        match &summary {
            Some(summary) => self.notify(summary).await,
            None if self.variant.requires_summary() => {
                return Err(Error::Deploy("deploy output has no Summary".into()));
            }
            None => {}
        }

        let purged_urls = if self.variant.purges_cdn() {
            self.invalidate_cdn(&stdout).await?
        } else {
            Vec::new()
        };

        let derived = self.derived()?;
        if self
            .variant
            .should_generate_manifest(&self.job, derived, &self.ctx.settings)
        {
            self.queue_manifest().await;
        }

        Ok(JobResult {
            deploy_target: self.variant.deploy_target().to_string(),
            summary,
            purged_urls,
            commands: plan.describe(),
        })
    }

    async fn invalidate_cdn(&self, deploy_stdout: &str) -> Result<Vec<String>> {
        let Some(cdn) = &self.ctx.cdn else {
            self.log("No CDN configured, skipping cache invalidation").await;
            return Ok(Vec::new());
        };
        let urls = output::changed_urls(deploy_stdout);
        if urls.is_empty() && cdn.mode() == PurgeMode::Urls {
            self.log("Deploy reported no changed URLs").await;
            return Ok(Vec::new());
        }

        let scope = self.derived()?.path_prefix.clone();
        let report = cdn
            .invalidate(self.job.id, &urls, &scope)
            .await
            .map_err(|e| Error::Deploy(e.message().to_string()))?;

        for failure in report.failures.iter().chain(&report.warm_failures) {
            self.log(format!(
                "CDN {} failed for {}: {}",
                failure.stage, failure.url, failure.message
            ))
            .await;
        }
        if let Err(e) = self
            .ctx
            .queue
            .record_purged_urls(self.job.id, report.purged.clone())
            .await
        {
            warn!(job_id = %self.job.id, error = %e, "Failed to record purged URLs");
        }
        self.notify(&format!("Purged {} URLs from the CDN", report.purged.len()))
            .await;
        Ok(report.purged)
    }

    async fn queue_manifest(&self) {
        match self.ctx.queue.insert_job(manifest_follow_on(&self.job)).await {
            Ok(InsertOutcome::Inserted(id)) => {
                self.log(format!("Queued search manifest job {}", id)).await
            }
            Ok(InsertOutcome::AlreadyQueued) => {
                self.log("Search manifest job already queued").await
            }
            Err(e) => {
                warn!(job_id = %self.job.id, error = %e, "Failed to queue search manifest job");
                self.log(format!("Could not queue search manifest job: {}", e))
                    .await;
            }
        }
    }

    /// Prepare or build failed: the attempt counts against the job.
    async fn attempt_failed(&mut self, err: Error) -> Result<ExecutionOutcome> {
        if matches!(err, Error::Validation(_) | Error::Authorization(_)) {
            return self.give_up(err).await;
        }
        if self.stop.is_stopped() {
            return Ok(self.stopped());
        }

        let reason = err.to_string();
        self.phase = Phase::Errored;
        self.log(reason.clone()).await;
        let job = self
            .ctx
            .queue
            .requeue_or_fail(self.job.id, &reason, self.job.failure_count)
            .await?;

        if job.status == JobStatus::Failed {
            self.notify(&format!(
                "Failed after {} attempts: {}",
                job.failure_count, reason
            ))
            .await;
            Ok(ExecutionOutcome::Failed { reason })
        } else {
            self.notify(&format!(
                "Attempt {} failed, retrying: {}",
                job.failure_count, reason
            ))
            .await;
            Ok(ExecutionOutcome::Requeued { reason })
        }
    }

    /// Permanently fail the job.
    async fn give_up(&mut self, err: Error) -> Result<ExecutionOutcome> {
        if self.stop.is_stopped() {
            return Ok(self.stopped());
        }

        let reason = deploy_failure_reason(self.variant.deploy_target(), &err);
        self.phase = Phase::Errored;
        self.log(reason.clone()).await;
        self.ctx.queue.fail_with_reason(self.job.id, &reason).await?;
        self.notify(&format!("Failed: {}", reason)).await;
        Ok(ExecutionOutcome::Failed { reason })
    }

    async fn cleanup(&mut self) {
        let repo_name = &self.job.payload.repo_name;
        match self.ctx.source.reset_workspace(repo_name).await {
            Ok(()) => {
                if let Some(dir) = self.repo_dir.take() {
                    debug!(job_id = %self.job.id, dir = %dir.display(), "Workspace cleaned up");
                }
            }
            Err(e) => warn!(job_id = %self.job.id, error = %e, "Workspace cleanup failed"),
        }
    }

    /// Run a command, appending its output to the job log.
    async fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.log(format!("Running `{}`", spec.display())).await;
        let output = self.ctx.runner.run(spec).await?;

        let lines: Vec<String> = [&output.stdout, &output.stderr]
            .into_iter()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .collect();
        if let Err(e) = self.ctx.queue.append_log(self.job.id, lines).await {
            warn!(job_id = %self.job.id, error = %e, "Failed to append command output");
        }
        Ok(output)
    }

    async fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!(job_id = %self.job.id, phase = %self.phase, "{}", line);
        if let Err(e) = self.ctx.queue.append_log(self.job.id, vec![line]).await {
            warn!(job_id = %self.job.id, error = %e, "Failed to append job log");
        }
    }

    async fn notify(&self, message: &str) {
        if let Err(e) = self
            .ctx
            .queue
            .append_notification(self.job.id, message)
            .await
        {
            warn!(job_id = %self.job.id, error = %e, "Failed to record notification");
        }
        if let Err(e) = self.ctx.notifier.notify(&self.job, message).await {
            warn!(
                job_id = %self.job.id,
                notifier = self.ctx.notifier.name(),
                error = %e,
                "Failed to send notification"
            );
        }
    }
}

fn failure_text(spec: &CommandSpec, output: &CommandOutput) -> String {
    let text = output.error_text().trim();
    if !text.is_empty() {
        return text.to_string();
    }
    match output.exit_code {
        Some(code) => format!("`{}` exited with {}", spec.display(), code),
        None => format!("`{}` was killed", spec.display()),
    }
}
