/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Sindri Telemetry Module
//!
//! Installs the `tracing` subscriber used by the schedulers and other
//! long-running tasks. `RUST_LOG` takes precedence over the configured level.
//!
//! ```rust,ignore
//! use sindri_utils::{telemetry, Settings};
//!
//! let settings = Settings::new(None)?;
//! telemetry::init(&settings.log.level, &settings.log.format)?;
//! tracing::info!("scheduler starting");
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Error type for telemetry initialization
#[derive(Debug)]
pub enum TelemetryError {
    /// The level or directive string could not be parsed
    FilterError(String),
    /// A global subscriber is already installed
    SubscriberError(String),
}

impl std::fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryError::FilterError(e) => write!(f, "Filter error: {}", e),
            TelemetryError::SubscriberError(e) => write!(f, "Subscriber error: {}", e),
        }
    }
}

impl std::error::Error for TelemetryError {}

/// Builds the filter: `RUST_LOG` if present, otherwise the given directive.
pub fn env_filter(log_level: &str) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(log_level).map_err(|e| TelemetryError::FilterError(e.to_string())),
    }
}

/// Installs a global `tracing` subscriber with text or JSON output.
///
/// # Arguments
/// * `log_level` - Filter directive (e.g., "info", "sindri_repository=debug")
/// * `log_format` - "text" or "json"
pub fn init(log_level: &str, log_format: &str) -> Result<(), TelemetryError> {
    let subscriber = tracing_subscriber::registry().with(env_filter(log_level)?);

    if log_format.eq_ignore_ascii_case("json") {
        subscriber
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| TelemetryError::SubscriberError(e.to_string()))
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| TelemetryError::SubscriberError(e.to_string()))
    }
}

/// Re-export tracing macros for convenience
pub mod prelude {
    pub use tracing::{debug, error, info, info_span, trace, warn};
    pub use tracing::Instrument;
}
