//! Cache invalidation pipeline.
//!
//! Every URL moves through resolve-key, purge and warm on its own. A URL
//! that fails a step is dropped from the later steps; the batch carries on.
//! Each step fans out one future per URL and joins them before the next step.

use docsmith_config::PurgeMode;
use docsmith_core::edge::EdgeClient;
use docsmith_core::{Error, JobId, Result};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Pipeline step a URL failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PurgeStage {
    ResolveKey,
    Purge,
    Warm,
}

impl fmt::Display for PurgeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurgeStage::ResolveKey => f.write_str("resolve-key"),
            PurgeStage::Purge => f.write_str("purge"),
            PurgeStage::Warm => f.write_str("warm"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UrlFailure {
    pub url: String,
    pub stage: PurgeStage,
    pub message: String,
}

/// Outcome of one invalidation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// URLs whose cache entries were purged.
    pub purged: Vec<String>,
    /// Purged URLs that were re-fetched successfully.
    pub warmed: Vec<String>,
    /// URLs dropped during key resolution or purge.
    pub failures: Vec<UrlFailure>,
    /// Purged URLs whose warm request failed. The purge itself still stands.
    pub warm_failures: Vec<UrlFailure>,
    /// Set when the whole scope was purged in one call.
    pub scope: Option<String>,
}

/// Runs cache invalidation for published jobs.
pub struct CdnInvalidator {
    edge: Arc<dyn EdgeClient>,
    mode: PurgeMode,
}

impl CdnInvalidator {
    pub fn new(edge: Arc<dyn EdgeClient>, mode: PurgeMode) -> Self {
        Self { edge, mode }
    }

    pub fn mode(&self) -> PurgeMode {
        self.mode
    }

    /// Invalidate `urls`, or the whole of `scope` when configured for scope purges.
    ///
    /// Fails only when every URL failed, or when the scope purge failed.
    pub async fn invalidate(
        &self,
        job_id: JobId,
        urls: &[String],
        scope: &str,
    ) -> Result<PurgeReport> {
        match self.mode {
            PurgeMode::Urls => self.purge_urls(job_id, urls).await,
            PurgeMode::Scope => {
                info!(%job_id, scope, edge = self.edge.name(), "Purging scope");
                self.edge.purge_scope(scope).await?;
                Ok(PurgeReport {
                    purged: dedupe(urls),
                    scope: Some(scope.to_string()),
                    ..PurgeReport::default()
                })
            }
        }
    }

    /// Resolve, purge and warm each URL independently.
    pub async fn purge_urls(&self, job_id: JobId, urls: &[String]) -> Result<PurgeReport> {
        let urls = dedupe(urls);
        let mut report = PurgeReport::default();
        if urls.is_empty() {
            return Ok(report);
        }
        info!(%job_id, count = urls.len(), edge = self.edge.name(), "Invalidating URLs");

        let resolved = join_all(urls.iter().map(|url| async move {
            (url.clone(), self.edge.surrogate_key(url).await)
        }))
        .await;
        let keyed = keep_successes(job_id, resolved, PurgeStage::ResolveKey, &mut report.failures);

        let purged = join_all(keyed.into_iter().map(|(url, key)| async move {
            let outcome = self.edge.purge_key(&key).await;
            (url, outcome)
        }))
        .await;
        report.purged = keep_successes(job_id, purged, PurgeStage::Purge, &mut report.failures)
            .into_iter()
            .map(|(url, ())| url)
            .collect();

        let warmed = join_all(report.purged.iter().map(|url| async move {
            (url.clone(), self.edge.warm(url).await)
        }))
        .await;
        report.warmed = keep_successes(job_id, warmed, PurgeStage::Warm, &mut report.warm_failures)
            .into_iter()
            .map(|(url, ())| url)
            .collect();

        info!(
            %job_id,
            purged = report.purged.len(),
            warmed = report.warmed.len(),
            failed = report.failures.len(),
            "Invalidation finished"
        );

        if report.purged.is_empty() {
            let detail = report
                .failures
                .iter()
                .map(|f| format!("{} ({}): {}", f.url, f.stage, f.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Cdn(format!(
                "all {} URLs failed to purge: {}",
                urls.len(),
                detail
            )));
        }

        Ok(report)
    }
}

/// Split per-URL outcomes, logging and recording each failure.
fn keep_successes<T>(
    job_id: JobId,
    outcomes: Vec<(String, Result<T>)>,
    stage: PurgeStage,
    failures: &mut Vec<UrlFailure>,
) -> Vec<(String, T)> {
    let mut kept = Vec::with_capacity(outcomes.len());
    for (url, outcome) in outcomes {
        match outcome {
            Ok(value) => kept.push((url, value)),
            Err(e) => {
                warn!(%job_id, url = %url, %stage, error = %e, "URL dropped from invalidation");
                failures.push(UrlFailure {
                    url,
                    stage,
                    message: e.message().to_string(),
                });
            }
        }
    }
    kept
}

fn dedupe(urls: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.iter()
        .filter(|url| seen.insert(url.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Edge double that fails configured URLs and keys, and records calls.
    #[derive(Default)]
    struct FakeEdge {
        unresolvable: Vec<String>,
        unpurgeable_keys: Vec<String>,
        scope_fails: bool,
        purged_keys: Mutex<Vec<String>>,
        warmed: Mutex<Vec<String>>,
        scopes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EdgeClient for FakeEdge {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn surrogate_key(&self, url: &str) -> Result<String> {
            if self.unresolvable.iter().any(|u| u == url) {
                return Err(Error::Cdn(format!("no surrogate key for {}", url)));
            }
            Ok(format!("key:{}", url))
        }

        async fn purge_key(&self, surrogate_key: &str) -> Result<()> {
            if self.unpurgeable_keys.iter().any(|k| k == surrogate_key) {
                return Err(Error::Cdn("purge rejected (503)".into()));
            }
            self.purged_keys
                .lock()
                .unwrap()
                .push(surrogate_key.to_string());
            Ok(())
        }

        async fn warm(&self, url: &str) -> Result<()> {
            self.warmed.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn purge_scope(&self, scope: &str) -> Result<()> {
            if self.scope_fails {
                return Err(Error::Cdn("scope purge rejected".into()));
            }
            self.scopes.lock().unwrap().push(scope.to_string());
            Ok(())
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://docs.example.com/atlas/page-{}", i))
            .collect()
    }

    #[tokio::test]
    async fn test_partial_failures_are_isolated() {
        let urls = urls(4);
        let edge = Arc::new(FakeEdge {
            unresolvable: vec![urls[0].clone()],
            unpurgeable_keys: vec![format!("key:{}", urls[1])],
            ..FakeEdge::default()
        });
        let invalidator = CdnInvalidator::new(edge.clone(), PurgeMode::Urls);

        let report = invalidator.purge_urls(JobId::new(), &urls).await.unwrap();

        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].stage, PurgeStage::ResolveKey);
        assert_eq!(report.failures[1].stage, PurgeStage::Purge);
        assert_eq!(report.purged, vec![urls[2].clone(), urls[3].clone()]);

        let mut warmed = edge.warmed.lock().unwrap().clone();
        warmed.sort();
        assert_eq!(warmed, vec![urls[2].clone(), urls[3].clone()]);
    }

    #[tokio::test]
    async fn test_all_urls_failing_is_an_error() {
        let urls = urls(2);
        let edge = Arc::new(FakeEdge {
            unresolvable: urls.clone(),
            ..FakeEdge::default()
        });
        let invalidator = CdnInvalidator::new(edge.clone(), PurgeMode::Urls);

        let err = invalidator
            .purge_urls(JobId::new(), &urls)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cdn(_)));
        assert!(err.to_string().contains("all 2 URLs failed"));
        assert!(edge.warmed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_url_list_is_a_no_op() {
        let edge = Arc::new(FakeEdge::default());
        let invalidator = CdnInvalidator::new(edge.clone(), PurgeMode::Urls);

        let report = invalidator.purge_urls(JobId::new(), &[]).await.unwrap();

        assert_eq!(report, PurgeReport::default());
        assert!(edge.purged_keys.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_urls_purged_once() {
        let mut list = urls(2);
        list.push(list[0].clone());
        let edge = Arc::new(FakeEdge::default());
        let invalidator = CdnInvalidator::new(edge.clone(), PurgeMode::Urls);

        let report = invalidator.purge_urls(JobId::new(), &list).await.unwrap();

        assert_eq!(report.purged.len(), 2);
        assert_eq!(edge.purged_keys.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_scope_mode_uses_single_call() {
        let edge = Arc::new(FakeEdge::default());
        let invalidator = CdnInvalidator::new(edge.clone(), PurgeMode::Scope);

        let report = invalidator
            .invalidate(JobId::new(), &urls(3), "docs/atlas")
            .await
            .unwrap();

        assert_eq!(report.scope.as_deref(), Some("docs/atlas"));
        assert_eq!(*edge.scopes.lock().unwrap(), vec!["docs/atlas".to_string()]);
        assert!(edge.purged_keys.lock().unwrap().is_empty());
        assert!(edge.warmed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scope_failure_surfaces() {
        let edge = Arc::new(FakeEdge {
            scope_fails: true,
            ..FakeEdge::default()
        });
        let invalidator = CdnInvalidator::new(edge, PurgeMode::Scope);

        let result = invalidator
            .invalidate(JobId::new(), &urls(1), "docs/atlas")
            .await;
        assert!(matches!(result, Err(Error::Cdn(_))));
    }
}
