//! Tracing setup shared by the server binary and ad-hoc tools.
//!
//! Output goes to stderr in compact form. Streamed session notifications
//! are product output and never pass through here.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the global tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_directive` when it is unset or
/// invalid.
///
/// # Example
/// ```bash
/// RUST_LOG=refiner=debug,refiner_server=debug refiner-server --port 8080
/// ```
pub fn init(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
