//! Core domain types and traits for the docsmith build orchestrator.
//!
//! This crate contains:
//! - Job identifiers, the job document and its payload
//! - The error taxonomy shared by every crate
//! - Collaborator traits consumed by the orchestration engine
//!   (command runner, source control, edge/CDN, notifications, access lookups)

pub mod access;
pub mod edge;
pub mod error;
pub mod executor;
pub mod id;
pub mod job;
pub mod notify;
pub mod source;

pub use error::{Error, Result};
pub use id::JobId;
pub use job::{
    DerivedFields, FailureRecord, Job, JobPayload, JobResult, JobStatus, JobType, MAX_FAILURES,
    NewJob, SizeClass,
};
