//! Diagnostics for unattended batch runs.
//!
//! Every component logs through `tracing`. Advisory outcomes (version
//! mismatch, a stray process that was already gone, a forced restart) are
//! emitted at `warn` so they stand out in long runs without failing them.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; falls back to `default_directive` when unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=driver=debug batch render songs styles out pairs.tsv
/// ```
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
