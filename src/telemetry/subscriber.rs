use super::config::TelemetryConfig;
use std::sync::OnceLock;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Guard that keeps the telemetry subsystem alive for the process lifetime.
#[derive(Debug)]
pub struct TelemetryGuard {
    service_name: String,
}

impl TelemetryGuard {
    /// Name the subscriber was initialised for.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

static TELEMETRY_INIT: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber (singleton, called once).
///
/// Uses `RUST_LOG` env var if set, otherwise falls back to `config.log_filter`.
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    TELEMETRY_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

        let fmt_layer = fmt::layer()
            .with_target(config.show_target)
            .with_thread_ids(config.show_thread_ids)
            .with_ansi(config.enable_console_colors);

        // A subscriber installed by the embedding application wins.
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init();
    });

    TelemetryGuard {
        service_name: config.service_name,
    }
}
