//! Process-wide log output.
//!
//! Library code logs through `log` and opens `tracing` spans; this installs a
//! single `tracing-subscriber` that renders both.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("A global subscriber is already installed")]
    AlreadyInitialized,

    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to bridge log records: {0}")]
    LogBridge(String),
}

/// Installs the global subscriber. `RUST_LOG` overrides the configured
/// filter when set. Fails on a second call.
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(&config.filter)?;

    let installed = match config.format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(true)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_current_span(true)),
        ),
    };
    installed.map_err(|_| TelemetryError::AlreadyInitialized)?;

    tracing_log::LogTracer::init().map_err(|e| TelemetryError::LogBridge(e.to_string()))?;

    tracing::debug!(format = ?config.format, "Logging initialized");
    Ok(())
}

fn build_filter(configured: &str) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(configured).map_err(|e| TelemetryError::InvalidFilter {
        filter: configured.to_string(),
        reason: e.to_string(),
    })
}
