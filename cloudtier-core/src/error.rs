use std::path::PathBuf;

use thiserror::Error;

use crate::orchestration::WorkerRole;

#[derive(Error, Debug)]
pub enum TieringError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to allocate queue {queue}: {reason}")]
    Allocation { queue: String, reason: String },

    #[error("queue segment {name} has an incompatible layout: {reason}")]
    NameConflict { name: String, reason: String },

    #[error("queue segment {name} is corrupt: {reason}")]
    CorruptSegment { name: String, reason: String },

    #[error("path entry of {len} bytes exceeds the limit of {max} bytes")]
    EntryTooLarge { len: usize, max: usize },

    #[error("invalid path entry: {0}")]
    InvalidEntry(String),

    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("failed to lock queue segment {name}: {source}")]
    Lock {
        name: String,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("filesystem walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("{action} failed for {path}: {reason}")]
    Transfer {
        action: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("unable to establish connection to remote storage: {0}")]
    BackendConnect(String),

    #[error("path {path} is outside the governed root {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("failed to spawn {role} worker: {source}")]
    Spawn {
        role: WorkerRole,
        #[source]
        source: std::io::Error,
    },

    #[error("{role} worker died {restarts} times within the restart window")]
    WorkerExhausted { role: WorkerRole, restarts: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TieringError {
    /// Convenience constructor for transfer failures.
    pub fn transfer(
        action: &'static str,
        path: impl Into<PathBuf>,
        reason: impl ToString,
    ) -> Self {
        TieringError::Transfer {
            action,
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TieringError>;
