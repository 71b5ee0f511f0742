//! Notification sink for human-readable job status.

use async_trait::async_trait;

use crate::{Job, Result};

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, job: &Job, message: &str) -> Result<()>;
}
