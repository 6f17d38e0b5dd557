pub mod sources;

use std::path::PathBuf;

use cloudtier_core::config::TieringConfig;

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub tiering: TieringConfig,
    pub logging: LoggingConfig,
    pub metadata: ConfigMetadata,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub source: PathBuf,
    /// Environment variables that overrode file values.
    pub env_overrides: Vec<&'static str>,
}
