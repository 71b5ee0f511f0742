//! In-memory stores for local development and tests.

use async_trait::async_trait;
use chrono::Utc;
use docsmith_core::access::{EntitlementLookup, PublishConfigLookup, RepoPublishConfig};
use docsmith_core::{Job, JobId, JobStatus, NewJob};
use std::cmp::Reverse;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::DbResult;
use crate::repo::jobs::{InsertOutcome, JobFilter, JobOrder, JobStore, JobUpdate};

/// JobStore held in process memory. A single mutex makes every
/// `find_one_and_update` atomic.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed document as is, bypassing deduplication.
    pub async fn insert_raw(&self, job: Job) {
        self.jobs.lock().await.push(job);
    }

    pub async fn all(&self) -> Vec<Job> {
        self.jobs.lock().await.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn ping(&self) -> DbResult<()> {
        Ok(())
    }

    async fn insert_if_absent(&self, job: NewJob) -> DbResult<InsertOutcome> {
        let mut jobs = self.jobs.lock().await;
        let intent = job.payload.intent();
        let pending = jobs.iter().any(|existing| {
            existing.status == JobStatus::Queued
                && existing.start_time.is_none()
                && existing.payload == intent
        });
        if pending {
            return Ok(InsertOutcome::AlreadyQueued);
        }

        let id = JobId::new();
        jobs.push(job.into_job(id, Utc::now()));
        Ok(InsertOutcome::Inserted(id))
    }

    async fn find_one_and_update(
        &self,
        filter: &JobFilter,
        order: JobOrder,
        update: &JobUpdate,
    ) -> DbResult<Option<Job>> {
        let mut jobs = self.jobs.lock().await;
        let candidates = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| filter.matches(job));

        let picked = match order {
            JobOrder::Any => candidates.map(|(idx, _)| idx).next(),
            JobOrder::PriorityThenAge => candidates
                .min_by_key(|(idx, job)| (Reverse(job.priority), job.created_time, *idx))
                .map(|(idx, _)| idx),
        };

        Ok(picked.map(|idx| {
            let job = &mut jobs[idx];
            update.apply(job);
            job.clone()
        }))
    }

    async fn get(&self, id: JobId) -> DbResult<Option<Job>> {
        Ok(self.jobs.lock().await.iter().find(|j| j.id == id).cloned())
    }

    async fn count_by_status(&self) -> DbResult<Vec<(JobStatus, i64)>> {
        let jobs = self.jobs.lock().await;
        let counts = [
            JobStatus::Queued,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
        ]
        .into_iter()
        .map(|status| {
            let count = jobs.iter().filter(|j| j.status == status).count() as i64;
            (status, count)
        })
        .filter(|(_, count)| *count > 0)
        .collect();
        Ok(counts)
    }
}

/// Entitlements and publish configuration held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryAccessStore {
    entitlements: HashMap<String, Vec<String>>,
    repos: HashMap<String, RepoPublishConfig>,
}

impl MemoryAccessStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entitlement<I, S>(mut self, user: impl Into<String>, repos: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entitlements
            .insert(user.into(), repos.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_repo(mut self, config: RepoPublishConfig) -> Self {
        self.repos.insert(config.repo_name.clone(), config);
        self
    }
}

#[async_trait]
impl EntitlementLookup for MemoryAccessStore {
    async fn entitled_repos(&self, user: &str) -> docsmith_core::Result<Option<Vec<String>>> {
        Ok(self.entitlements.get(user).cloned())
    }
}

#[async_trait]
impl PublishConfigLookup for MemoryAccessStore {
    async fn repo_publish_config(
        &self,
        repo_name: &str,
    ) -> docsmith_core::Result<Option<RepoPublishConfig>> {
        Ok(self.repos.get(repo_name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use docsmith_core::{JobPayload, JobType};

    fn new_job(repo: &str, priority: i32) -> NewJob {
        let payload = JobPayload::new(JobType::PushBuild, "mongodb", repo, "main");
        NewJob::new(format!("build {}", repo), "alice", "alice@example.com", payload)
            .with_priority(priority)
    }

    fn claim_update() -> JobUpdate {
        JobUpdate {
            status: Some(JobStatus::InProgress),
            start_time: Some(Some(Utc::now())),
            ..JobUpdate::default()
        }
    }

    #[tokio::test]
    async fn test_insert_deduplicates_pending_payloads() {
        let store = MemoryJobStore::new();

        let first = store.insert_if_absent(new_job("docs", 1)).await.unwrap();
        let second = store.insert_if_absent(new_job("docs", 1)).await.unwrap();
        let other = store.insert_if_absent(new_job("docs-atlas", 1)).await.unwrap();

        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert_eq!(second, InsertOutcome::AlreadyQueued);
        assert!(matches!(other, InsertOutcome::Inserted(_)));
        assert_eq!(store.all().await.len(), 2);
    }

    #[tokio::test]
    async fn test_insert_allowed_once_previous_started() {
        let store = MemoryJobStore::new();
        store.insert_if_absent(new_job("docs", 1)).await.unwrap();
        store
            .find_one_and_update(
                &JobFilter::claimable(Utc::now()),
                JobOrder::PriorityThenAge,
                &claim_update(),
            )
            .await
            .unwrap()
            .unwrap();

        let again = store.insert_if_absent(new_job("docs", 1)).await.unwrap();
        assert!(matches!(again, InsertOutcome::Inserted(_)));
    }

    #[tokio::test]
    async fn test_find_one_and_update_orders_by_priority_then_age() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let low_old = new_job("a", 1).with_created_time(now - Duration::days(2));
        let low_new = new_job("b", 1).with_created_time(now);
        let high = new_job("c", 2).with_created_time(now);
        for job in [low_new, high, low_old] {
            store.insert_if_absent(job).await.unwrap();
        }

        let mut order = Vec::new();
        while let Some(job) = store
            .find_one_and_update(
                &JobFilter::claimable(Utc::now()),
                JobOrder::PriorityThenAge,
                &claim_update(),
            )
            .await
            .unwrap()
        {
            order.push(job.payload.repo_name);
        }
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_find_one_and_update_without_match() {
        let store = MemoryJobStore::new();
        let updated = store
            .find_one_and_update(
                &JobFilter::by_id(JobId::new()),
                JobOrder::Any,
                &claim_update(),
            )
            .await
            .unwrap();
        assert!(updated.is_none());
    }

    #[tokio::test]
    async fn test_count_by_status() {
        let store = MemoryJobStore::new();
        store.insert_if_absent(new_job("a", 1)).await.unwrap();
        store.insert_if_absent(new_job("b", 1)).await.unwrap();
        store
            .find_one_and_update(
                &JobFilter::claimable(Utc::now()),
                JobOrder::PriorityThenAge,
                &claim_update(),
            )
            .await
            .unwrap();

        let counts = store.count_by_status().await.unwrap();
        assert_eq!(
            counts,
            vec![(JobStatus::Queued, 1), (JobStatus::InProgress, 1)]
        );
    }

    #[tokio::test]
    async fn test_access_store_lookups() {
        let access = MemoryAccessStore::new().with_entitlement("alice", ["mongodb/docs"]);

        assert_eq!(
            access.entitled_repos("alice").await.unwrap(),
            Some(vec!["mongodb/docs".to_string()])
        );
        assert_eq!(access.entitled_repos("bob").await.unwrap(), None);
        assert!(access.repo_publish_config("docs").await.unwrap().is_none());
    }
}
