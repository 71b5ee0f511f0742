//! Job store: a document store with atomic single-document find-and-update.
//!
//! The only consistency primitive the orchestrator relies on is
//! `find_one_and_update`: select one document matching a predicate, apply an
//! update and return the new document, all as one atomic step. Claiming work
//! is built entirely on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docsmith_core::{FailureRecord, Job, JobId, JobPayload, JobResult, JobStatus, NewJob};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::{DbError, DbResult};

/// Predicate selecting job documents. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub id: Option<JobId>,
    pub status: Option<JobStatus>,
    /// Match only documents created at or before this instant.
    pub created_before: Option<DateTime<Utc>>,
}

impl JobFilter {
    pub fn by_id(id: JobId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    /// Queued jobs whose creation time has been reached.
    pub fn claimable(now: DateTime<Utc>) -> Self {
        Self {
            id: None,
            status: Some(JobStatus::Queued),
            created_before: Some(now),
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.id.is_none_or(|id| job.id == id)
            && self.status.is_none_or(|status| job.status == status)
            && self
                .created_before
                .is_none_or(|before| job.created_time <= before)
    }
}

/// Which matching document `find_one_and_update` picks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobOrder {
    /// Any match; intended for filters that select by id.
    #[default]
    Any,
    /// Highest priority first, oldest first within a priority.
    PriorityThenAge,
}

/// Mutation applied to one document. Unset fields are left unchanged;
/// `push_*` fields append to the document's arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    /// `Some(None)` clears the start time.
    pub start_time: Option<Option<DateTime<Utc>>>,
    pub end_time: Option<DateTime<Utc>>,
    pub increment_failures: bool,
    pub push_failure: Option<FailureRecord>,
    pub push_logs: Vec<String>,
    pub push_notifications: Vec<String>,
    pub push_purged_urls: Vec<String>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
}

impl JobUpdate {
    /// Apply this update to an in-memory document.
    pub fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(start_time) = self.start_time {
            job.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            job.end_time = Some(end_time);
        }
        if self.increment_failures {
            job.failure_count += 1;
        }
        if let Some(failure) = &self.push_failure {
            job.failures.push(failure.clone());
        }
        job.logs.extend(self.push_logs.iter().cloned());
        job.notifications
            .extend(self.push_notifications.iter().cloned());
        job.purged_urls.extend(self.push_purged_urls.iter().cloned());
        if let Some(result) = &self.result {
            job.result = Some(result.clone());
        }
        if let Some(error) = &self.error {
            job.error = Some(error.clone());
        }
    }
}

/// Result of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(JobId),
    /// An identical payload is already waiting to start.
    AlreadyQueued,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Check the store is reachable.
    async fn ping(&self) -> DbResult<()>;

    /// Insert unless a document with an equal payload is still queued and
    /// not yet started.
    async fn insert_if_absent(&self, job: NewJob) -> DbResult<InsertOutcome>;

    /// Atomically pick one document matching `filter`, apply `update` and
    /// return the updated document.
    async fn find_one_and_update(
        &self,
        filter: &JobFilter,
        order: JobOrder,
        update: &JobUpdate,
    ) -> DbResult<Option<Job>>;

    async fn get(&self, id: JobId) -> DbResult<Option<Job>>;

    /// Number of documents per status.
    async fn count_by_status(&self) -> DbResult<Vec<(JobStatus, i64)>>;
}

/// A job row as stored in PostgreSQL.
#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: uuid::Uuid,
    title: String,
    requester: String,
    email: String,
    payload: Json<JobPayload>,
    status: String,
    priority: i32,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    failure_count: i32,
    failures: Json<Vec<FailureRecord>>,
    logs: Json<Vec<String>>,
    notifications: Json<Vec<String>>,
    purged_urls: Json<Vec<String>>,
    result: Option<Json<JobResult>>,
    error: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> DbResult<Self> {
        let status = row
            .status
            .parse::<JobStatus>()
            .map_err(|e| DbError::Corrupt(format!("job {}: {}", row.id, e)))?;
        Ok(Job {
            id: JobId::from_uuid(row.id),
            title: row.title,
            user: row.requester,
            email: row.email,
            payload: row.payload.0,
            status,
            priority: row.priority,
            created_time: row.created_at,
            start_time: row.started_at,
            end_time: row.ended_at,
            failure_count: row.failure_count,
            failures: row.failures.0,
            logs: row.logs.0,
            notifications: row.notifications.0,
            purged_urls: row.purged_urls.0,
            result: row.result.map(|r| r.0),
            error: row.error,
        })
    }
}

/// PostgreSQL implementation of JobStore.
///
/// Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never block on,
/// or both win, the same row.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &JobFilter) {
        qb.push(" WHERE TRUE");
        if let Some(id) = filter.id {
            qb.push(" AND id = ").push_bind(*id.as_uuid());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(before) = filter.created_before {
            qb.push(" AND created_at <= ").push_bind(before);
        }
    }

    fn push_sets(qb: &mut QueryBuilder<'_, Postgres>, update: &JobUpdate) {
        let mut sets = qb.separated(", ");
        // Keeps the statement valid for updates that only append nothing.
        sets.push("id = id");
        if let Some(status) = update.status {
            sets.push("status = ");
            sets.push_bind_unseparated(status.as_str());
        }
        if let Some(start_time) = update.start_time {
            sets.push("started_at = ");
            sets.push_bind_unseparated(start_time);
        }
        if let Some(end_time) = update.end_time {
            sets.push("ended_at = ");
            sets.push_bind_unseparated(end_time);
        }
        if update.increment_failures {
            sets.push("failure_count = failure_count + 1");
        }
        if let Some(failure) = &update.push_failure {
            sets.push("failures = failures || ");
            sets.push_bind_unseparated(Json(vec![failure.clone()]));
        }
        if !update.push_logs.is_empty() {
            sets.push("logs = logs || ");
            sets.push_bind_unseparated(Json(update.push_logs.clone()));
        }
        if !update.push_notifications.is_empty() {
            sets.push("notifications = notifications || ");
            sets.push_bind_unseparated(Json(update.push_notifications.clone()));
        }
        if !update.push_purged_urls.is_empty() {
            sets.push("purged_urls = purged_urls || ");
            sets.push_bind_unseparated(Json(update.push_purged_urls.clone()));
        }
        if let Some(result) = &update.result {
            sets.push("result = ");
            sets.push_bind_unseparated(Json(result.clone()));
        }
        if let Some(error) = &update.error {
            sets.push("error = ");
            sets.push_bind_unseparated(error.clone());
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_if_absent(&self, job: NewJob) -> DbResult<InsertOutcome> {
        let payload = Json(job.payload.intent());
        let mut tx = self.pool.begin().await?;

        // Serializes inserts of one payload so the existence check and the
        // insert cannot interleave. Released at commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(&payload)
            .execute(&mut *tx)
            .await?;

        let id: Option<uuid::Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (id, title, requester, email, payload, status, priority, created_at)
            SELECT $1, $2, $3, $4, $5, 'queued', $6, COALESCE($7, NOW())
            WHERE NOT EXISTS (
                SELECT 1 FROM jobs
                WHERE md5(payload::text) = md5($5::text)
                  AND payload = $5
                  AND status = 'queued'
                  AND started_at IS NULL
            )
            RETURNING id
            "#,
        )
        .bind(uuid::Uuid::now_v7())
        .bind(&job.title)
        .bind(&job.user)
        .bind(&job.email)
        .bind(&payload)
        .bind(job.priority)
        .bind(job.created_time)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(match id {
            Some(id) => InsertOutcome::Inserted(JobId::from_uuid(id)),
            None => InsertOutcome::AlreadyQueued,
        })
    }

    async fn find_one_and_update(
        &self,
        filter: &JobFilter,
        order: JobOrder,
        update: &JobUpdate,
    ) -> DbResult<Option<Job>> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE jobs SET ");
        Self::push_sets(&mut qb, update);

        match (order, filter.id) {
            (JobOrder::Any, Some(_)) => {
                Self::push_filter(&mut qb, filter);
            }
            (JobOrder::Any, None) => {
                qb.push(" WHERE id = (SELECT id FROM jobs");
                Self::push_filter(&mut qb, filter);
                qb.push(" FOR UPDATE LIMIT 1)");
            }
            (JobOrder::PriorityThenAge, _) => {
                qb.push(" WHERE id = (SELECT id FROM jobs");
                Self::push_filter(&mut qb, filter);
                qb.push(" ORDER BY priority DESC, created_at ASC FOR UPDATE SKIP LOCKED LIMIT 1)");
            }
        }
        qb.push(" RETURNING *");

        let row = qb
            .build_query_as::<JobRow>()
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn get(&self, id: JobId) -> DbResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn count_by_status(&self) -> DbResult<Vec<(JobStatus, i64)>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status ORDER BY status")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(status, count)| {
                let status = status
                    .parse::<JobStatus>()
                    .map_err(|e| DbError::Corrupt(e.to_string()))?;
                Ok((status, count))
            })
            .collect()
    }
}
