//! Tracing subscriber setup for structured request logging.
//!
//! Supports the two configured output formats: human-readable text for
//! development and JSON lines for ingestion. The level filter accepts
//! anything `EnvFilter` understands (`info`, `modelgate=debug,hyper=warn`).

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogFormat;

/// Initializes the global tracing subscriber.
///
/// Calling this twice is a setup bug and panics the process at startup, which
/// is the only place it is called from.
pub fn init_tracing(format: LogFormat, level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_target(false))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .init();
        }
    }
}
