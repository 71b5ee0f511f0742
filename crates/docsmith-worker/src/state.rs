//! Application state.

use docsmith_scheduler::{JobQueue, WorkerState};
use std::sync::Arc;
use std::time::Duration;

/// Shared state for the health routes.
#[derive(Clone)]
pub struct AppState {
    pub worker: Arc<WorkerState>,
    pub queue: Arc<JobQueue>,
    /// A worker that has not completed a poll for this long is not live.
    pub staleness: Duration,
}

impl AppState {
    pub fn new(worker: Arc<WorkerState>, queue: Arc<JobQueue>, staleness: Duration) -> Self {
        Self {
            worker,
            queue,
            staleness,
        }
    }
}
