//! CDN cache invalidation for docsmith.
//!
//! Provides:
//! - `FastlyClient`, an edge client for surrogate-key lookup, purge and warm
//! - `CdnInvalidator`, the per-URL resolve/purge/warm pipeline run at publish time

pub mod fastly;
pub mod pipeline;

pub use docsmith_core::edge::EdgeClient;
pub use fastly::FastlyClient;
pub use pipeline::{CdnInvalidator, PurgeReport, PurgeStage, UrlFailure};
