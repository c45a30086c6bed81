//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. The log level comes
//! from config and can be overridden with `RUST_LOG`. Debug builds print
//! human-readable output; release builds emit JSON lines with span context.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info"
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = format!("warn,navigator_engine={}", log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false).with_writer(std::io::stderr))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .ok();
    }
}

/// Initialize with "info" when no config is available yet.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}
