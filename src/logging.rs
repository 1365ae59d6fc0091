//! Logging setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging. Call once at process start; the `RUST_LOG`
/// environment variable overrides the default filter.
pub fn init() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "windowcast=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
