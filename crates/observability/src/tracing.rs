//! Tracing/logging initialization.
//!
//! JSON lines on stdout, filtered through `RUST_LOG`. Each job's log entries
//! carry a `job_id` field so failures can be correlated with the queue.

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info";

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_default(DEFAULT_DIRECTIVE);
}

/// Same as [`init`], with a caller-chosen fallback filter.
pub fn init_with_default(directive: &str) {
    let filter = build_filter(std::env::var("RUST_LOG").ok().as_deref(), directive);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

fn build_filter(env: Option<&str>, fallback: &str) -> EnvFilter {
    env.and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback))
}
