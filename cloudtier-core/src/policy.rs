use std::fs::Metadata;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::config::PolicyConfig;
use crate::layout::TierLayout;

/// Verdict for one file of the governed tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    None,
    /// Move content to the remote tier.
    Demote,
    /// Bring content back to the local tier.
    Promote,
}

/// Decides which files move between tiers. Consulted once per file per scan.
pub trait Policy: Send + Sync {
    fn classify(&self, path: &Path, metadata: &Metadata) -> Classification;
}

/// Default policy driven by last access time.
///
/// Regular files of at least `min_size_bytes` that have not been read for
/// `demote_after` are demoted. A stub (empty local file whose content lives
/// remotely) read within `promote_within` is promoted.
#[derive(Clone, Debug)]
pub struct AccessAgePolicy {
    config: PolicyConfig,
    layout: TierLayout,
}

impl AccessAgePolicy {
    pub fn new(config: PolicyConfig, layout: TierLayout) -> Self {
        Self { config, layout }
    }

    pub fn classify_at(
        &self,
        path: &Path,
        metadata: &Metadata,
        now: SystemTime,
    ) -> Classification {
        if !metadata.is_file() {
            return Classification::None;
        }
        let Ok(accessed) = metadata.accessed() else {
            return Classification::None;
        };
        let idle = now.duration_since(accessed).unwrap_or(Duration::ZERO);

        if metadata.len() == 0 {
            if idle <= self.config.promote_within()
                && self.has_remote_copy(path)
            {
                return Classification::Promote;
            }
            return Classification::None;
        }

        if metadata.len() >= self.config.min_size_bytes
            && idle >= self.config.demote_after()
        {
            return Classification::Demote;
        }
        Classification::None
    }

    fn has_remote_copy(&self, path: &Path) -> bool {
        self.layout
            .remote_path(path)
            .map(|remote| remote.is_file())
            .unwrap_or(false)
    }
}

impl Policy for AccessAgePolicy {
    fn classify(&self, path: &Path, metadata: &Metadata) -> Classification {
        self.classify_at(path, metadata, SystemTime::now())
    }
}
