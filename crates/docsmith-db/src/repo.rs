//! Store traits and implementations.

pub mod access;
pub mod jobs;
pub mod memory;

pub use access::{PgEntitlementRepo, PgRepoBranchesRepo};
pub use jobs::{InsertOutcome, JobFilter, JobOrder, JobStore, JobUpdate, PgJobStore};
pub use memory::{MemoryAccessStore, MemoryJobStore};
