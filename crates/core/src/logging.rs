//! Structured logging infrastructure for VitalChain.
//!
//! This module provides centralized logging initialization with support
//! for structured JSON output and environment-based configuration.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the logging system with structured output.
///
/// Log level can be configured via the `RUST_LOG` environment variable.
/// If not set, defaults to `info` level.
///
/// # Example
/// ```no_run
/// use vitalchain_core::logging;
///
/// logging::init();
/// tracing::info!("Ledger started");
/// ```
pub fn init() {
    init_with(&LoggingConfig::default());
}

/// Initialize the logging system with JSON output for production environments.
///
/// # Example
/// ```no_run
/// use vitalchain_core::logging;
///
/// logging::init_json();
/// tracing::info!(service = "vitalchain-node", "Service started");
/// ```
pub fn init_json() {
    init_with(&LoggingConfig {
        json: true,
        ..LoggingConfig::default()
    });
}

/// Initialize from the `[logging]` configuration section.
///
/// `RUST_LOG` still takes precedence over the configured level. Output goes to
/// stderr so command output on stdout stays machine readable. A second call
/// in the same process is a no-op.
pub fn init_with(config: &LoggingConfig) {
    let filter = build_filter(&config.level);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Logging already initialized");
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
