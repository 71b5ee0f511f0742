//! KDL configuration parsing for docsmith.
//!
//! This crate handles parsing of the worker configuration (`docsmith.kdl`)
//! and the environment overrides applied on top of it.

pub mod error;
pub mod worker;

pub use error::{ConfigError, ConfigResult};
pub use worker::{
    CdnConfig, CommandConfig, HealthConfig, LogConfig, LogFormat, ManifestConfig, NotifyConfig,
    PurgeMode, StoreConfig, WorkerConfig, WorkerLoopConfig, load_config, parse_worker_config,
};
