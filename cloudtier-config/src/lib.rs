//! Configuration library for cloudtier.
//!
//! Reads the daemon's TOML file, applies environment overrides, and runs the
//! guard rails. Both `cloudtierd` and `cloudtierctl` load their settings
//! through [`ConfigLoader`] so defaults and validation stay in one place.

pub mod loader;
pub mod models;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, error::ConfigLoadError};
pub use models::sources::{EnvConfig, FileConfig};
pub use models::{Config, ConfigMetadata, LoggingConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
