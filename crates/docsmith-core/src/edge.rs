//! Edge/CDN API trait.

use async_trait::async_trait;

use crate::Result;

/// Operations the invalidation pipeline needs from the content-delivery edge.
#[async_trait]
pub trait EdgeClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Look up the surrogate key the edge associates with `url`.
    async fn surrogate_key(&self, url: &str) -> Result<String>;

    async fn purge_key(&self, surrogate_key: &str) -> Result<()>;

    /// Fetch `url` so the edge re-caches it.
    async fn warm(&self, url: &str) -> Result<()>;

    /// Purge everything tagged with `scope`. Idempotent.
    async fn purge_scope(&self, scope: &str) -> Result<()>;
}
