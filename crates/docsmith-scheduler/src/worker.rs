//! Worker that claims jobs from the queue and runs them one at a time.

use docsmith_config::WorkerConfig;
use docsmith_core::{Job, JobId, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::handler::{HandlerContext, JobHandler, StopHandle};
use crate::queue::JobQueue;
use crate::validator::JobValidator;

/// Reason recorded on a job requeued because its worker is going away.
pub const SHUTDOWN_REASON: &str = "server is being shutdown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Wait between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Upper bound on the back-off after consecutive store errors.
    pub error_backoff_max: Duration,
    /// How long shutdown waits for an in-flight execution to unwind.
    pub drain_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            poll_interval: config.worker.poll_interval,
            error_backoff_max: config.worker.error_backoff_max,
            drain_timeout: config.worker.drain_timeout,
        }
    }

    /// Delay after `consecutive_errors` failed polls in a row.
    fn backoff(&self, consecutive_errors: u32) -> Duration {
        let factor = 2u32.saturating_pow(consecutive_errors.saturating_sub(1).min(16));
        self.poll_interval
            .saturating_mul(factor)
            .min(self.error_backoff_max)
    }
}

#[derive(Debug, Clone)]
struct CurrentJob {
    id: JobId,
    failure_count: i32,
    stop: StopHandle,
}

/// Worker status read by the health probes.
#[derive(Debug)]
pub struct WorkerState {
    started: Instant,
    store_ready: AtomicBool,
    last_poll: Mutex<Option<Instant>>,
    current: Mutex<Option<CurrentJob>>,
}

impl Default for WorkerState {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            store_ready: AtomicBool::new(false),
            last_poll: Mutex::new(None),
            current: Mutex::new(None),
        }
    }

    pub fn set_store_ready(&self, ready: bool) {
        self.store_ready.store(ready, Ordering::SeqCst);
    }

    /// The worker can reach its job store and may be sent traffic.
    pub fn is_ready(&self) -> bool {
        self.store_ready.load(Ordering::SeqCst)
    }

    fn record_poll(&self) {
        *self.last_poll.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// Time since the last completed poll, or since start before the first.
    pub fn since_last_poll(&self) -> Duration {
        self.last_poll
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(self.started)
            .elapsed()
    }

    /// Alive while running a job or while polls keep completing within `staleness`.
    pub fn is_live(&self, staleness: Duration) -> bool {
        self.current_job().is_some() || self.since_last_poll() <= staleness
    }

    pub fn current_job(&self) -> Option<JobId> {
        self.lock_current().as_ref().map(|current| current.id)
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Option<CurrentJob>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_current(&self, job: &Job, stop: StopHandle) {
        *self.lock_current() = Some(CurrentJob {
            id: job.id,
            failure_count: job.failure_count,
            stop,
        });
    }

    fn take_current(&self) -> Option<CurrentJob> {
        self.lock_current().take()
    }
}

/// What one poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The queue had nothing claimable.
    Idle,
    /// A job was claimed and ran to an outcome.
    Processed(JobId),
    /// Shutdown arrived while a job was running.
    ShutDown,
}

/// A worker that claims and executes jobs.
pub struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    validator: Arc<JobValidator>,
    ctx: Arc<HandlerContext>,
    state: Arc<WorkerState>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        validator: Arc<JobValidator>,
        ctx: Arc<HandlerContext>,
        state: Arc<WorkerState>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id: id.into(),
            queue: ctx.queue.clone(),
            validator,
            ctx,
            state,
            settings,
        }
    }

    pub fn state(&self) -> &Arc<WorkerState> {
        &self.state
    }

    /// Run the worker loop until `shutdown` turns true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, "Starting worker");
        let mut consecutive_errors = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.poll_once(&mut shutdown).await {
                Ok(PollOutcome::Processed(_)) => {
                    consecutive_errors = 0;
                    continue;
                }
                Ok(PollOutcome::Idle) => {
                    consecutive_errors = 0;
                    self.settings.poll_interval
                }
                Ok(PollOutcome::ShutDown) => break,
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let delay = self.settings.backoff(consecutive_errors);
                    warn!(
                        worker_id = %self.id,
                        error = %e,
                        consecutive_errors,
                        retry_in_ms = delay.as_millis() as u64,
                        "Poll failed"
                    );
                    delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Claim one job and run it to an outcome.
    pub async fn poll_once(&self, shutdown: &mut watch::Receiver<bool>) -> Result<PollOutcome> {
        let claimed = self.queue.claim_next().await;
        self.state.set_store_ready(claimed.is_ok());
        let Some(job) = claimed? else {
            self.state.record_poll();
            return Ok(PollOutcome::Idle);
        };
        self.state.record_poll();

        let job_id = job.id;
        info!(
            worker_id = %self.id,
            %job_id,
            job_type = %job.payload.job_type,
            priority = job.priority,
            attempt = job.failure_count + 1,
            "Claimed job"
        );

        let stop = StopHandle::new();
        self.state.set_current(&job, stop.clone());
        let outcome = self.process(job, stop, shutdown).await;
        self.state.take_current();
        outcome
    }

    async fn process(
        &self,
        job: Job,
        stop: StopHandle,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PollOutcome> {
        let job_id = job.id;
        let admission = match self.validator.admit(&job).await {
            Ok(admission) => admission,
            Err(e) => {
                warn!(worker_id = %self.id, %job_id, error = %e, "Job rejected");
                self.queue.fail_with_reason(job_id, &e.to_string()).await?;
                let message = format!("Rejected: {}", e);
                if let Err(err) = self.queue.append_notification(job_id, &message).await {
                    warn!(%job_id, error = %err, "Failed to record notification");
                }
                if let Err(err) = self.ctx.notifier.notify(&job, &message).await {
                    warn!(%job_id, error = %err, "Failed to send notification");
                }
                return Ok(PollOutcome::Processed(job_id));
            }
        };

        let mut handler = JobHandler::new(job, admission, self.ctx.clone(), stop);
        let execution = handler.execute();
        tokio::pin!(execution);

        tokio::select! {
            result = &mut execution => result.map(|_| PollOutcome::Processed(job_id)),
            _ = shutdown_requested(shutdown) => {
                self.release_current_job().await;
                match tokio::time::timeout(self.settings.drain_timeout, &mut execution).await {
                    Ok(result) => info!(%job_id, ?result, "In-flight execution unwound"),
                    Err(_) => warn!(
                        %job_id,
                        drain_timeout_ms = self.settings.drain_timeout.as_millis() as u64,
                        "In-flight execution did not unwind in time"
                    ),
                }
                Ok(PollOutcome::ShutDown)
            }
        }
    }

    /// Stop the running handler and hand its job back to the queue.
    ///
    /// The attempt counts as a failure, so a job that keeps taking workers
    /// down is eventually failed rather than retried forever.
    pub async fn release_current_job(&self) {
        let Some(current) = self.state.lock_current().clone() else {
            return;
        };
        current.stop.stop();
        match self
            .queue
            .requeue_or_fail(current.id, SHUTDOWN_REASON, current.failure_count)
            .await
        {
            Ok(job) => info!(
                worker_id = %self.id,
                job_id = %current.id,
                status = %job.status,
                "Released job on shutdown"
            ),
            Err(e) => error!(
                worker_id = %self.id,
                job_id = %current.id,
                error = %e,
                "Failed to release job on shutdown"
            ),
        }
    }
}

/// Resolves once shutdown has been signalled. Never resolves if the sender
/// is gone without signalling.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRunner, FakeSource, Harness, new_job};
    use docsmith_core::{JobStatus, JobType};

    fn settings() -> WorkerSettings {
        WorkerSettings {
            poll_interval: Duration::from_millis(10),
            error_backoff_max: Duration::from_millis(80),
            drain_timeout: Duration::from_secs(2),
        }
    }

    fn worker(harness: &Harness) -> Worker {
        Worker::new(
            "test-worker",
            harness.validator(),
            harness.context(),
            Arc::new(WorkerState::new()),
            settings(),
        )
    }

    #[test]
    fn test_backoff_is_capped() {
        let settings = settings();
        assert_eq!(settings.backoff(1), Duration::from_millis(10));
        assert_eq!(settings.backoff(2), Duration::from_millis(20));
        assert_eq!(settings.backoff(3), Duration::from_millis(40));
        assert_eq!(settings.backoff(10), Duration::from_millis(80));
        assert_eq!(settings.backoff(u32::MAX), Duration::from_millis(80));
    }

    #[tokio::test]
    async fn test_idle_poll() {
        let harness = Harness::new(FakeRunner::default(), FakeSource::default());
        let worker = worker(&harness);
        let (_tx, mut rx) = watch::channel(false);

        let outcome = worker.poll_once(&mut rx).await.unwrap();

        assert_eq!(outcome, PollOutcome::Idle);
        assert!(worker.state().is_ready());
        assert!(worker.state().is_live(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_poll_runs_job_to_completion() {
        let harness = Harness::new(FakeRunner::default(), FakeSource::default());
        let worker = worker(&harness);
        harness
            .queue
            .insert_job(new_job(JobType::PushBuild, "docs", "main"))
            .await
            .unwrap();
        let (_tx, mut rx) = watch::channel(false);

        let outcome = worker.poll_once(&mut rx).await.unwrap();

        let PollOutcome::Processed(id) = outcome else {
            panic!("expected a processed job, got {:?}", outcome);
        };
        let job = harness.queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(worker.state().current_job().is_none());
    }

    #[tokio::test]
    async fn test_rejected_job_is_failed_without_side_effects() {
        let harness = Harness::new(FakeRunner::default(), FakeSource::default());
        let worker = worker(&harness);
        harness
            .queue
            .insert_job(new_job(JobType::PushBuild, "docs-compass", "main"))
            .await
            .unwrap();
        let (_tx, mut rx) = watch::channel(false);

        let PollOutcome::Processed(id) = worker.poll_once(&mut rx).await.unwrap() else {
            panic!("expected a processed job");
        };

        let job = harness.queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("not entitled"));
        assert_eq!(job.notifications.len(), 1);
        assert!(job.notifications[0].starts_with("Rejected: "));
        assert_eq!(harness.notifier.messages(), job.notifications);
        assert!(harness.source.calls().is_empty());
        assert!(harness.runner.ran.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_requeues_in_flight_job() {
        let harness = Harness::new(
            FakeRunner::with_delay(Duration::from_millis(200)),
            FakeSource::default(),
        );
        let worker = Arc::new(worker(&harness));
        harness
            .queue
            .insert_job(new_job(JobType::PushBuild, "docs", "main"))
            .await
            .unwrap();
        // One earlier attempt already failed.
        let job = harness.queue.claim_next().await.unwrap().unwrap();
        harness
            .queue
            .requeue_or_fail(job.id, "clone failed", 0)
            .await
            .unwrap();

        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(rx).await }
        });

        while worker.state().current_job().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        running.await.unwrap();

        let job = harness.queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.failure_count, 2);
        assert_eq!(job.start_time, None);
        assert!(job.failures.last().unwrap().reason.contains("shutdown"));
        // The in-flight execution cleaned up before the worker returned.
        assert_eq!(
            harness.source.calls().last().map(String::as_str),
            Some("reset docs")
        );
        assert!(worker.state().current_job().is_none());
    }

    #[tokio::test]
    async fn test_run_exits_on_shutdown_when_idle() {
        let harness = Harness::new(FakeRunner::default(), FakeSource::default());
        let worker = Arc::new(worker(&harness));
        let (tx, rx) = watch::channel(false);

        let running = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run(rx).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), running)
            .await
            .expect("worker exits promptly")
            .unwrap();
    }

    #[test]
    fn test_liveness_goes_stale() {
        let state = WorkerState::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(state.is_live(Duration::from_secs(60)));
        assert!(!state.is_live(Duration::ZERO));
        assert!(!state.is_ready());
    }
}
