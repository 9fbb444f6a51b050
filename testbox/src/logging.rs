//! Diagnostic tracing for testbox runs.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. The report file and
//! the `run:` / `cleanup:` lines on stdout are product output and do not
//! depend on it.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `testbox=info` if unset.
///
/// # Example
/// ```bash
/// RUST_LOG=testbox=debug testbox run -f config.yaml
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("testbox=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
