use std::env;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. `RUST_LOG` wins when set,
/// otherwise `CLASSHUB_LOG_LEVEL` (default `info`). Safe to call once
/// from the embedding application, not from library code.
pub fn init_logging() {
    let level = env::var("CLASSHUB_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => EnvFilter::new(level.to_lowercase()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
