//! Tracing/logging initialization.

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// `[logging]` section of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `"info"` or `"raas_infra=debug,info"`.
    pub filter: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// `RUST_LOG` wins over the configured directives; invalid configured
    /// directives fall back to `info`.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the process-wide subscriber.
///
/// Safe to call multiple times (subsequent calls are no-ops). Logs go to
/// stderr so exported data on stdout stays clean.
pub fn init(config: &LoggingConfig) {
    let filter = config.env_filter();

    if config.json {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_info_text() {
        let config = LoggingConfig::default();
        assert_eq!(config.filter, "info");
        assert!(!config.json);
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = LoggingConfig {
            filter: "debug".to_string(),
            json: true,
        };
        init(&config);
        init(&config);
        ::tracing::info!(target: "raas", "subscriber installed");
    }
}
