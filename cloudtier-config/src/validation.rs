use std::path::{Path, PathBuf};

use thiserror::Error;

use super::models::Config;

/// Largest accepted `queues.path_max`.
pub const PATH_MAX_LIMIT: usize = 65_536;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("{field} is required")]
    MissingField { field: &'static str },
    #[error("{field} must be at least 1")]
    ZeroCapacity { field: &'static str },
    #[error("queues.path_max must be in 2..={PATH_MAX_LIMIT}, got {value}")]
    PathMaxOutOfRange { value: usize },
    #[error("{field} must be an absolute path, got {path}")]
    RelativePath { field: &'static str, path: PathBuf },
    #[error("storage.remote_root {remote} lies inside scan.root {scan}")]
    RemoteInsideScanRoot { remote: PathBuf, scan: PathBuf },
    #[error("queues.download_primary_name {name:?} is not a plain file name")]
    InvalidQueueName { name: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(
        &mut self,
        message: S,
        hint: H,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConfigWarning> {
        self.items.iter()
    }
}

pub fn apply_guard_rails(
    config: &Config,
) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();
    let tiering = &config.tiering;

    let scan_root = required_path("scan.root", &tiering.scan.root)?;
    let remote_root =
        required_path("storage.remote_root", &tiering.storage.remote_root)?;
    if remote_root.starts_with(scan_root) {
        return Err(ConfigGuardRailError::RemoteInsideScanRoot {
            remote: remote_root.to_path_buf(),
            scan: scan_root.to_path_buf(),
        });
    }

    let queues = &tiering.queues;
    for (field, value) in [
        (
            "queues.download_primary_capacity",
            queues.download_primary_capacity,
        ),
        (
            "queues.download_secondary_capacity",
            queues.download_secondary_capacity,
        ),
        (
            "queues.upload_secondary_capacity",
            queues.upload_secondary_capacity,
        ),
    ] {
        if value == 0 {
            return Err(ConfigGuardRailError::ZeroCapacity { field });
        }
    }
    if !(2..=PATH_MAX_LIMIT).contains(&queues.path_max) {
        return Err(ConfigGuardRailError::PathMaxOutOfRange {
            value: queues.path_max,
        });
    }

    let name = &queues.download_primary_name;
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(ConfigGuardRailError::InvalidQueueName {
            name: name.clone(),
        });
    }
    required_path("queues.segment_dir", &queues.segment_dir)?;

    if !queues.segment_dir.starts_with("/dev/shm") {
        warnings.push_with_hint(
            format!(
                "queues.segment_dir {} is not on /dev/shm",
                queues.segment_dir.display()
            ),
            "The download-primary queue will survive reboots but each \
             operation touches the backing filesystem",
        );
    }

    if !scan_root.is_dir() {
        warnings.push_with_hint(
            format!("scan.root {} does not exist yet", scan_root.display()),
            "Scan cycles fail until the directory is created",
        );
    }

    if tiering.scheduler.idle_tick_ms < 10 {
        warnings.push_with_hint(
            format!(
                "scheduler.idle_tick_ms is {}; idle workers wake very often",
                tiering.scheduler.idle_tick_ms
            ),
            "Pushes wake consumers immediately; the idle tick bounds the wait",
        );
    }

    if tiering.scan.rescan_interval() > tiering.supervisor.stall_threshold() {
        warnings.push(
            "scan.rescan_interval_ms exceeds supervisor.stall_threshold_ms; \
             an idle scanner is never reported as stalled",
        );
    }

    Ok(warnings)
}

fn required_path<'a>(
    field: &'static str,
    path: &'a Path,
) -> Result<&'a Path, ConfigGuardRailError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigGuardRailError::MissingField { field });
    }
    if !path.is_absolute() {
        return Err(ConfigGuardRailError::RelativePath {
            field,
            path: path.to_path_buf(),
        });
    }
    Ok(path)
}
