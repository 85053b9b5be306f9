//! Tracing subscriber setup shared by the service binaries

use crate::config::LoggingConfig;
use crate::{Error, Result};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the EnvFilter: `RUST_LOG` wins, otherwise the configured level
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global tracing subscriber
///
/// Logs go to stderr, or to `config.file` (appended, no ANSI colors) when set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config);

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Config(format!("Open log file {} failed: {}", path.display(), e)))?;

            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Arc::new(file)),
                )
                .try_init()
                .map_err(|e| Error::Internal(format!("Logging already initialized: {}", e)))
        }
        None => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("Logging already initialized: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_filter_falls_back_to_configured_level() {
        std::env::remove_var("RUST_LOG");
        let config = LoggingConfig {
            level: "debug".to_string(),
            file: None,
        };
        assert_eq!(env_filter(&config).to_string(), "debug");
    }
}
