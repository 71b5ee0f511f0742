//! Job scheduling for docsmith.
//!
//! Claims jobs from the shared queue, admits them, and drives each through
//! the build lifecycle. Claiming relies on the job store's atomic
//! find-and-update, so any number of workers can share one queue.

pub mod handler;
pub mod queue;
pub mod validator;
pub mod worker;

#[cfg(test)]
mod testing;

pub use handler::{
    ExecutionOutcome, HandlerContext, HandlerSettings, JobHandler, JobVariant, Phase, StopHandle,
};
pub use queue::JobQueue;
pub use validator::{Admission, JobValidator, PublishTarget};
pub use worker::{PollOutcome, SHUTDOWN_REASON, Worker, WorkerSettings, WorkerState};
