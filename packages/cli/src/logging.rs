// ABOUTME: Tracing subscriber setup for the replinet binary
// ABOUTME: Honors RUST_LOG and falls back to info-level compact output

use replinet_config::constants::RUST_LOG;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

/// Filter from `RUST_LOG`, or `fallback` when unset or invalid
pub fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_env(RUST_LOG).unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Install the global subscriber. Safe to call more than once; later calls are ignored.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_FILTER))
        .with_target(false)
        .compact()
        .try_init();
}
