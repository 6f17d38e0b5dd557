//! Daemon configuration types.
//!
//! Loading, environment overrides and validation live in `cloudtier-config`;
//! these structures are what every component receives.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Full tiering configuration passed into the orchestrator.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TieringConfig {
    /// Queue sizing and the shared download-primary segment.
    pub queues: QueueConfig,
    /// Consumer idle behaviour.
    pub scheduler: SchedulerConfig,
    /// Governed tree and rescan cadence.
    pub scan: ScanConfig,
    /// Thresholds for the default access-age policy.
    pub policy: PolicyConfig,
    /// Remote tier location.
    pub storage: StorageConfig,
    /// Worker liveness and restart budget.
    pub supervisor: SupervisorConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum path length including the terminator byte.
    pub path_max: usize,
    pub download_primary_capacity: usize,
    pub download_secondary_capacity: usize,
    pub upload_secondary_capacity: usize,
    /// Directory holding the named download-primary segment.
    pub segment_dir: PathBuf,
    pub download_primary_name: String,
    /// Re-check cadence for producers blocked on a full shared queue.
    pub backpressure_tick_ms: u64,
}

impl QueueConfig {
    pub fn backpressure_tick(&self) -> Duration {
        Duration::from_millis(self.backpressure_tick_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path_max: 4096,
            download_primary_capacity: 1024,
            download_secondary_capacity: 4096,
            upload_secondary_capacity: 4096,
            segment_dir: PathBuf::from("/dev/shm"),
            download_primary_name: "cloudtier-download-primary".to_string(),
            backpressure_tick_ms: 250,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Longest a consumer sleeps on empty queues before polling again.
    pub idle_tick_ms: u64,
}

impl SchedulerConfig {
    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms.max(1))
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { idle_tick_ms: 250 }
    }
}

/// Queue that receives scan-driven promotions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromoteTarget {
    Primary,
    #[default]
    Secondary,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Root of the governed local tree.
    pub root: PathBuf,
    pub rescan_interval_ms: u64,
    pub follow_links: bool,
    /// Do not descend into other mounts below the root.
    pub same_file_system: bool,
    pub promote_into: PromoteTarget,
}

impl ScanConfig {
    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            rescan_interval_ms: 30_000,
            follow_links: false,
            same_file_system: true,
            promote_into: PromoteTarget::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Files not accessed for this long are demoted.
    pub demote_after_secs: u64,
    /// Stubs accessed this recently are promoted.
    pub promote_within_secs: u64,
    /// Smaller files stay local.
    pub min_size_bytes: u64,
}

impl PolicyConfig {
    pub fn demote_after(&self) -> Duration {
        Duration::from_secs(self.demote_after_secs)
    }

    pub fn promote_within(&self) -> Duration {
        Duration::from_secs(self.promote_within_secs)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            demote_after_secs: 30 * 24 * 60 * 60,
            promote_within_secs: 60 * 60,
            min_size_bytes: 4096,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// Mounted directory acting as the remote tier.
    pub remote_root: PathBuf,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub check_interval_ms: u64,
    /// Heartbeat age after which a worker is reported as stalled.
    pub stall_threshold_ms: u64,
    /// Restarts allowed per role inside `restart_window_secs` before aborting.
    pub max_restarts: usize,
    pub restart_window_secs: u64,
}

impl SupervisorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 1_000,
            stall_threshold_ms: 5 * 60 * 1_000,
            max_restarts: 5,
            restart_window_secs: 600,
        }
    }
}
