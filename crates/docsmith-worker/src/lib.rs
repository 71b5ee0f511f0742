//! Documentation build worker.
//!
//! Runs the job poll loop and serves liveness/readiness probes for the
//! process supervisor.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;

pub use state::AppState;
