use std::fs::{self, File, FileTimes, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::{Result, TieringError};
use crate::layout::TierLayout;

use super::StorageBackend;

const TEMP_SUFFIX: &str = ".cloudtier-tmp";

/// True for the temporary files transfers write before renaming into place.
pub fn is_transfer_temp(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(TEMP_SUFFIX))
}

/// Maps an I/O failure on `path` to a transfer error for `action`.
fn transfer_err<'a>(
    action: &'static str,
    path: &'a Path,
) -> impl Fn(io::Error) -> TieringError + 'a {
    move |err| TieringError::transfer(action, path, err)
}

fn temp_sibling(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        TieringError::InvalidEntry(format!(
            "{} has no file name",
            path.display()
        ))
    })?;
    let mut temp = std::ffi::OsString::from(".");
    temp.push(name);
    temp.push(TEMP_SUFFIX);
    Ok(path.with_file_name(temp))
}

/// Remote tier backed by a mounted directory mirroring the governed tree.
///
/// Uploads leave an empty stub behind with the original timestamps; downloads
/// restore the content and drop the remote copy. Both sides write to a
/// temporary sibling and rename, so readers never observe partial content.
#[derive(Clone, Debug)]
pub struct LocalDirBackend {
    layout: TierLayout,
}

impl LocalDirBackend {
    pub fn new(layout: TierLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &TierLayout {
        &self.layout
    }

    fn copy_via_temp(source: &Path, target: &Path) -> io::Result<()> {
        let temp = temp_sibling(target)
            .map_err(|err| io::Error::other(err.to_string()))?;
        let result = fs::copy(source, &temp)
            .and_then(|_| File::open(&temp)?.sync_all())
            .and_then(|()| fs::rename(&temp, target));
        if result.is_err() {
            let _ = fs::remove_file(&temp);
        }
        result
    }
}

impl StorageBackend for LocalDirBackend {
    fn connect(&self) -> Result<()> {
        let remote = self.layout.remote_root();
        match fs::metadata(remote) {
            Ok(meta) if meta.is_dir() => {
                tracing::info!(
                    target: "cloudtier::startup",
                    remote_root = %remote.display(),
                    "remote tier reachable"
                );
                Ok(())
            }
            Ok(_) => Err(TieringError::BackendConnect(format!(
                "{} is not a directory",
                remote.display()
            ))),
            Err(err) => Err(TieringError::BackendConnect(format!(
                "{}: {err}",
                remote.display()
            ))),
        }
    }

    fn upload(&self, path: &Path) -> Result<()> {
        const ACTION: &str = "upload file";

        let failed = transfer_err(ACTION, path);

        let metadata = fs::symlink_metadata(path).map_err(&failed)?;
        if !metadata.is_file() {
            return Err(TieringError::transfer(
                ACTION,
                path,
                "not a regular file",
            ));
        }
        if metadata.len() == 0 {
            tracing::debug!(
                target: "cloudtier::transfer",
                path = %path.display(),
                "skipping empty file"
            );
            return Ok(());
        }

        let remote = self.layout.remote_path(path)?;
        if let Some(parent) = remote.parent() {
            fs::create_dir_all(parent).map_err(&failed)?;
        }
        Self::copy_via_temp(path, &remote).map_err(&failed)?;

        let now = SystemTime::now();
        let times = FileTimes::new()
            .set_accessed(metadata.accessed().unwrap_or(now))
            .set_modified(metadata.modified().unwrap_or(now));
        let local = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(&failed)?;
        local
            .set_len(0)
            .and_then(|()| local.set_times(times))
            .map_err(&failed)?;

        tracing::debug!(
            target: "cloudtier::transfer",
            path = %path.display(),
            bytes = metadata.len(),
            "demoted file to remote tier"
        );
        Ok(())
    }

    fn download(&self, path: &Path) -> Result<()> {
        const ACTION: &str = "download file";

        let remote = self.layout.remote_path(path)?;
        if !remote.is_file() {
            return Err(TieringError::transfer(ACTION, path, "no remote copy"));
        }
        let failed = transfer_err(ACTION, path);
        let metadata = fs::symlink_metadata(path).map_err(&failed)?;
        if !metadata.is_file() || metadata.len() != 0 {
            return Err(TieringError::transfer(
                ACTION,
                path,
                "local file is not a stub",
            ));
        }

        Self::copy_via_temp(&remote, path).map_err(&failed)?;

        let restored = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(&failed)?;
        let now = SystemTime::now();
        let times = FileTimes::new()
            .set_accessed(now)
            .set_modified(metadata.modified().unwrap_or(now));
        restored
            .set_permissions(metadata.permissions())
            .and_then(|()| restored.set_times(times))
            .map_err(&failed)?;

        fs::remove_file(&remote).map_err(&failed)?;

        tracing::debug!(
            target: "cloudtier::transfer",
            path = %path.display(),
            "promoted file to local tier"
        );
        Ok(())
    }
}
