//! Structured logging via `tracing`.

use tracing_subscriber::EnvFilter;

use crate::config::LoggerConfig;

/// Initialize the global tracing subscriber from logger configuration.
///
/// `RUST_LOG` takes precedence over the configured level so operators can
/// raise verbosity without touching the config file. Must be called once,
/// before any spans or events are emitted.
pub fn init(config: &LoggerConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let use_stderr = config.output == "stderr";

    match (config.format.as_str(), use_stderr) {
        ("json", false) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        ("json", true) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init(),
        (_, false) => tracing_subscriber::fmt().with_env_filter(filter).init(),
        (_, true) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}
