//! Tracing setup.
//!
//! One subscriber per process: formatted output to stderr, `RUST_LOG`
//! controlled filtering, and span traces on errors via `tracing-error`.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the process-wide subscriber. Call once at startup; later
/// calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,flowloom=debug"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(ErrorLayer::default())
        .try_init();
}
