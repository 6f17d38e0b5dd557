use std::path::{Path, PathBuf};

use crate::error::{Result, TieringError};

/// Maps files of the governed local tree onto the mirrored remote tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TierLayout {
    local_root: PathBuf,
    remote_root: PathBuf,
}

impl TierLayout {
    pub fn new(
        local_root: impl Into<PathBuf>,
        remote_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            local_root: local_root.into(),
            remote_root: remote_root.into(),
        }
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    pub fn remote_root(&self) -> &Path {
        &self.remote_root
    }

    /// Remote counterpart of `local`, which must live under the local root.
    pub fn remote_path(&self, local: &Path) -> Result<PathBuf> {
        let relative = local
            .strip_prefix(&self.local_root)
            .map_err(|_| TieringError::OutsideRoot {
                path: local.to_path_buf(),
                root: self.local_root.clone(),
            })?;
        if relative.as_os_str().is_empty() {
            return Err(TieringError::OutsideRoot {
                path: local.to_path_buf(),
                root: self.local_root.clone(),
            });
        }
        Ok(self.remote_root.join(relative))
    }
}
