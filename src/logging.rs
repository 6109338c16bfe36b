//! Tracing subscriber setup for binaries and tests that embed the engine.

use tracing_subscriber::EnvFilter;

/// Environment variable consulted first for the log filter.
pub const LOG_ENV: &str = "PASSAGE_SEARCH_LOG";

fn env_filter() -> EnvFilter {
    dotenvy::var(LOG_ENV)
        .or_else(|_| dotenvy::var("RUST_LOG"))
        .ok()
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install a global fmt subscriber. Returns `false` when one is already set.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .try_init()
        .is_ok()
}
