use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use cloudtier_core::config::{
    PolicyConfig, QueueConfig, ScanConfig, SchedulerConfig, StorageConfig,
    SupervisorConfig, TieringConfig,
};

use crate::util::{non_empty, parse_path};

pub const ENV_SCAN_ROOT: &str = "CLOUDTIER_SCAN_ROOT";
pub const ENV_REMOTE_ROOT: &str = "CLOUDTIER_REMOTE_ROOT";
pub const ENV_SEGMENT_DIR: &str = "CLOUDTIER_SEGMENT_DIR";
pub const ENV_LOG: &str = "CLOUDTIER_LOG";

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub queues: QueueConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub logging: FileLoggingConfig,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLoggingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl FileConfig {
    pub fn into_tiering(self) -> TieringConfig {
        TieringConfig {
            queues: self.queues,
            scheduler: self.scheduler,
            scan: self.scan,
            policy: self.policy,
            storage: self.storage,
            supervisor: self.supervisor,
        }
    }
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub scan_root: Option<PathBuf>,
    pub remote_root: Option<PathBuf>,
    pub segment_dir: Option<PathBuf>,
    pub log_filter: Option<String>,
}

impl EnvConfig {
    /// Reads the process environment.
    pub fn gather() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |name| lookup(name).as_deref().and_then(parse_path);
        Self {
            scan_root: path(ENV_SCAN_ROOT),
            remote_root: path(ENV_REMOTE_ROOT),
            segment_dir: path(ENV_SEGMENT_DIR),
            log_filter: lookup(ENV_LOG).as_deref().and_then(non_empty),
        }
    }

    /// Applies every set value, returning the names of the variables used.
    pub fn apply(
        self,
        tiering: &mut TieringConfig,
        log_filter: &mut Option<String>,
    ) -> Vec<&'static str> {
        let mut applied = Vec::new();
        if let Some(root) = self.scan_root {
            tiering.scan.root = root;
            applied.push(ENV_SCAN_ROOT);
        }
        if let Some(root) = self.remote_root {
            tiering.storage.remote_root = root;
            applied.push(ENV_REMOTE_ROOT);
        }
        if let Some(dir) = self.segment_dir {
            tiering.queues.segment_dir = dir;
            applied.push(ENV_SEGMENT_DIR);
        }
        if let Some(filter) = self.log_filter {
            *log_filter = Some(filter);
            applied.push(ENV_LOG);
        }
        applied
    }
}
