//! Core functionality for the VitalChain vital-sign ledger.
//!
//! This crate provides the ambient pieces shared by every other crate in the
//! workspace: configuration, structured logging, the core error type and
//! wall-clock helpers.

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use config::{
    ConfigError, IngestConfig, LedgerConfig, LoggingConfig, MirrorBackend, RetryConfig,
    StorageConfig,
};
pub use error::{CoreError, Result};
pub use time::{current_timestamp_ms, format_timestamp_ms};
