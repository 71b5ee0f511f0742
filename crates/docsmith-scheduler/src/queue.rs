//! Job queue: every lifecycle transition the orchestrator performs on a job
//! document, built on the store's atomic find-and-update.
//!
//! Every store call carries a deadline. A call that exceeds it fails with
//! `Error::StorageTimeout` instead of hanging the poll loop.

use chrono::Utc;
use docsmith_core::{
    Error, FailureRecord, Job, JobId, JobResult, JobStatus, MAX_FAILURES, NewJob, Result,
};
use docsmith_db::{DbResult, InsertOutcome, JobFilter, JobOrder, JobStore, JobUpdate};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Job queue backed by a `JobStore`.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    timeout: Duration,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = DbResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => {
                warn!(op, timeout_ms = self.timeout.as_millis() as u64, "Job store call timed out");
                Err(Error::StorageTimeout(format!(
                    "{} did not finish within {}ms",
                    op,
                    self.timeout.as_millis()
                )))
            }
        }
    }

    /// Update the in-progress job `id`. `NotFound` when the job does not
    /// exist or is no longer in progress.
    async fn transition(&self, op: &'static str, id: JobId, update: JobUpdate) -> Result<Job> {
        let filter = JobFilter::by_id(id).with_status(JobStatus::InProgress);
        self.bounded(op, self.store.find_one_and_update(&filter, JobOrder::Any, &update))
            .await?
            .ok_or_else(|| Error::NotFound(format!("no in-progress job {}", id)))
    }

    /// Append to a job regardless of its status.
    async fn append(&self, op: &'static str, id: JobId, update: JobUpdate) -> Result<()> {
        let filter = JobFilter::by_id(id);
        self.bounded(op, self.store.find_one_and_update(&filter, JobOrder::Any, &update))
            .await?
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("job {}", id)))
    }

    pub async fn ping(&self) -> Result<()> {
        self.bounded("ping", self.store.ping()).await
    }

    /// Enqueue a job unless an identical request is already waiting.
    pub async fn insert_job(&self, job: NewJob) -> Result<InsertOutcome> {
        let title = job.title.clone();
        let outcome = self.bounded("insert", self.store.insert_if_absent(job)).await?;
        match outcome {
            InsertOutcome::Inserted(id) => info!(job_id = %id, %title, "Job queued"),
            InsertOutcome::AlreadyQueued => debug!(%title, "Identical job already queued"),
        }
        Ok(outcome)
    }

    /// Atomically claim the highest-priority, oldest claimable job.
    ///
    /// Two concurrent claims never return the same job.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        let now = Utc::now();
        let update = JobUpdate {
            status: Some(JobStatus::InProgress),
            start_time: Some(Some(now)),
            ..JobUpdate::default()
        };
        self.bounded(
            "claim",
            self.store
                .find_one_and_update(&JobFilter::claimable(now), JobOrder::PriorityThenAge, &update),
        )
        .await
    }

    /// Mark an in-progress job completed with its result.
    pub async fn complete_with_result(&self, id: JobId, result: JobResult) -> Result<Job> {
        let update = JobUpdate {
            status: Some(JobStatus::Completed),
            end_time: Some(Utc::now()),
            result: Some(result),
            ..JobUpdate::default()
        };
        self.transition("complete", id, update).await
    }

    /// Permanently fail an in-progress job.
    pub async fn fail_with_reason(&self, id: JobId, reason: &str) -> Result<Job> {
        let now = Utc::now();
        let update = JobUpdate {
            status: Some(JobStatus::Failed),
            start_time: Some(None),
            end_time: Some(now),
            push_failure: Some(FailureRecord {
                time: now,
                reason: reason.to_string(),
            }),
            error: Some(reason.to_string()),
            ..JobUpdate::default()
        };
        self.transition("fail", id, update).await
    }

    /// Record a failed attempt. The job goes back on the queue unless this
    /// attempt brings it to `MAX_FAILURES`, in which case it is failed.
    ///
    /// `failure_count` is the count the caller observed when it claimed the job.
    pub async fn requeue_or_fail(&self, id: JobId, reason: &str, failure_count: i32) -> Result<Job> {
        let now = Utc::now();
        let attempts = failure_count + 1;
        let mut update = JobUpdate {
            increment_failures: true,
            push_failure: Some(FailureRecord {
                time: now,
                reason: reason.to_string(),
            }),
            error: Some(reason.to_string()),
            ..JobUpdate::default()
        };
        if attempts >= MAX_FAILURES {
            update.status = Some(JobStatus::Failed);
            update.end_time = Some(now);
        } else {
            update.status = Some(JobStatus::Queued);
            update.start_time = Some(None);
        }

        let job = self.transition("requeue", id, update).await?;
        info!(job_id = %id, attempts, status = %job.status, reason, "Recorded failed attempt");
        Ok(job)
    }

    pub async fn append_log(&self, id: JobId, lines: Vec<String>) -> Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let update = JobUpdate {
            push_logs: lines,
            ..JobUpdate::default()
        };
        self.append("append_log", id, update).await
    }

    pub async fn append_notification(&self, id: JobId, message: &str) -> Result<()> {
        let update = JobUpdate {
            push_notifications: vec![message.to_string()],
            ..JobUpdate::default()
        };
        self.append("append_notification", id, update).await
    }

    pub async fn record_purged_urls(&self, id: JobId, urls: Vec<String>) -> Result<()> {
        if urls.is_empty() {
            return Ok(());
        }
        let update = JobUpdate {
            push_purged_urls: urls,
            ..JobUpdate::default()
        };
        self.append("record_purged_urls", id, update).await
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        self.bounded("get", self.store.get(id)).await
    }

    pub async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>> {
        self.bounded("count", self.store.count_by_status()).await
    }
}
