pub mod error;

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::sources::{EnvConfig, FileConfig};
use crate::models::{Config, ConfigMetadata, LoggingConfig};
use crate::validation::{ConfigWarnings, apply_guard_rails};

use error::ConfigLoadError;

/// Loaded configuration plus the non-fatal findings of the guard rails.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

/// Resolves configuration from a file, then the environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
    env: Option<EnvConfig>,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            env: None,
        }
    }

    /// Uses `env` instead of reading the process environment.
    pub fn with_env(mut self, env: EnvConfig) -> Self {
        self.env = Some(env);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(self) -> Result<ConfigLoad, ConfigLoadError> {
        let contents = fs::read_to_string(&self.path).map_err(|source| {
            ConfigLoadError::Read {
                path: self.path.clone(),
                source,
            }
        })?;
        let file: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let mut log_filter = file.logging.filter.clone();
        let mut tiering = file.into_tiering();
        let env = self.env.unwrap_or_else(EnvConfig::gather);
        let env_overrides = env.apply(&mut tiering, &mut log_filter);

        let config = Config {
            tiering,
            logging: log_filter
                .map(|filter| LoggingConfig { filter })
                .unwrap_or_default(),
            metadata: ConfigMetadata {
                source: self.path,
                env_overrides,
            },
        };

        let warnings = apply_guard_rails(&config)?;
        Ok(ConfigLoad { config, warnings })
    }
}
