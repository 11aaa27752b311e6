//! Core error types

use thiserror::Error;

/// Core error type for VitalChain
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be loaded or validated
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used by the core crate
pub type Result<T> = std::result::Result<T, CoreError>;
