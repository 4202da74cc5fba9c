//! Logging setup: tracing subscriber with env-filter plus the `log` bridge,
//! so both `log::` and `tracing::` macros end up in one place.

use tracing_subscriber::EnvFilter;

/// Initializes global logging. `default_filter` applies when `RUST_LOG`
/// is unset (e.g. "info" or "prodflow=debug,info").
///
/// Safe to call more than once; later calls are no-ops.
pub fn init(default_filter: &str) {
    // Bridge `log` records into tracing. Fails if a logger is already
    // installed, which is fine.
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.to_string()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
