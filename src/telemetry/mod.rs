//! Tracing subscriber setup for the indexer binary and embedders.

/// Telemetry configuration.
pub mod config;

/// Global subscriber initialisation.
pub mod subscriber;

pub use config::TelemetryConfig;
pub use subscriber::{TelemetryGuard, init_telemetry};
