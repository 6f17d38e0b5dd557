//! Remote storage capability used by the transfer workers.

mod local_dir;

use std::fmt;
use std::path::Path;

use crate::error::Result;

pub use local_dir::{LocalDirBackend, is_transfer_temp};

/// Moves file content between the local tier and remote storage.
///
/// Implementations are shared by both transfer workers and must tolerate
/// concurrent calls for different paths.
pub trait StorageBackend: Send + Sync {
    /// Establishes the connection. Called once at startup after the queues
    /// exist; failure aborts startup.
    fn connect(&self) -> Result<()>;

    /// Restores the content of a local stub from remote storage.
    fn download(&self, path: &Path) -> Result<()>;

    /// Moves the content of a local file to remote storage, leaving a stub.
    fn upload(&self, path: &Path) -> Result<()>;
}

/// Direction of a transfer worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Download,
    Upload,
}

impl TransferKind {
    /// Name used in failure diagnostics.
    pub fn action_name(self) -> &'static str {
        match self {
            TransferKind::Download => "download file",
            TransferKind::Upload => "upload file",
        }
    }

    pub fn apply(
        self,
        backend: &dyn StorageBackend,
        path: &Path,
    ) -> Result<()> {
        match self {
            TransferKind::Download => backend.download(path),
            TransferKind::Upload => backend.upload(path),
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Download => write!(f, "download"),
            TransferKind::Upload => write!(f, "upload"),
        }
    }
}
