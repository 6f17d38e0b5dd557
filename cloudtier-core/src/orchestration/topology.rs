use std::fmt;
use std::sync::Arc;

use crate::config::QueueConfig;
use crate::error::Result;
use crate::queue::{Queue, QueueOptions, QueuePair};

/// The queues the daemon allocates, in allocation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueSlot {
    DownloadPrimary,
    DownloadSecondary,
    UploadSecondary,
}

impl QueueSlot {
    pub const ALL: [QueueSlot; 3] = [
        QueueSlot::DownloadPrimary,
        QueueSlot::DownloadSecondary,
        QueueSlot::UploadSecondary,
    ];

    /// Download-primary is the only named, cross-process queue.
    pub fn options(self, config: &QueueConfig) -> QueueOptions {
        let options = match self {
            QueueSlot::DownloadPrimary => QueueOptions::shared(
                config.download_primary_capacity,
                config.path_max,
                &config.segment_dir,
                config.download_primary_name.clone(),
            ),
            QueueSlot::DownloadSecondary => QueueOptions::process_local(
                config.download_secondary_capacity,
                config.path_max,
            ),
            QueueSlot::UploadSecondary => QueueOptions::process_local(
                config.upload_secondary_capacity,
                config.path_max,
            ),
        };
        options.with_backpressure_tick(config.backpressure_tick())
    }
}

impl fmt::Display for QueueSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueSlot::DownloadPrimary => write!(f, "download-primary"),
            QueueSlot::DownloadSecondary => write!(f, "download-secondary"),
            QueueSlot::UploadSecondary => write!(f, "upload-secondary"),
        }
    }
}

/// Creates and releases queues on behalf of the orchestrator.
pub trait QueueAllocator: Send + Sync {
    fn allocate(&self, slot: QueueSlot, options: QueueOptions) -> Result<Queue>;

    fn release(&self, slot: QueueSlot, queue: Queue) {
        tracing::debug!(
            target: "cloudtier::startup",
            queue = %slot,
            "releasing queue"
        );
        queue.destroy();
    }
}

/// Allocates real queues.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemQueueAllocator;

impl QueueAllocator for SystemQueueAllocator {
    fn allocate(
        &self,
        _slot: QueueSlot,
        options: QueueOptions,
    ) -> Result<Queue> {
        Queue::create(options)
    }
}

/// Queues allocated so far, released in reverse order.
pub(crate) struct AllocatedQueues {
    allocator: Arc<dyn QueueAllocator>,
    queues: Vec<(QueueSlot, Arc<Queue>)>,
}

impl AllocatedQueues {
    pub(crate) fn new(allocator: Arc<dyn QueueAllocator>) -> Self {
        Self {
            allocator,
            queues: Vec::with_capacity(QueueSlot::ALL.len()),
        }
    }

    pub(crate) fn allocate(
        &mut self,
        slot: QueueSlot,
        options: QueueOptions,
    ) -> Result<Arc<Queue>> {
        let queue = match self.allocator.allocate(slot, options) {
            Ok(queue) => Arc::new(queue),
            Err(err) => {
                tracing::error!(
                    target: "cloudtier::startup",
                    queue = %slot,
                    error = %err,
                    "queue allocation failed"
                );
                return Err(err);
            }
        };
        tracing::debug!(
            target: "cloudtier::startup",
            queue = %slot,
            capacity = queue.capacity(),
            "allocated queue"
        );
        self.queues.push((slot, Arc::clone(&queue)));
        Ok(queue)
    }

    pub(crate) fn release_all(mut self) {
        while let Some((slot, queue)) = self.queues.pop() {
            match Arc::try_unwrap(queue) {
                Ok(queue) => self.allocator.release(slot, queue),
                Err(queue) => tracing::warn!(
                    target: "cloudtier::startup",
                    queue = %slot,
                    handles = Arc::strong_count(&queue),
                    "queue still referenced at teardown; dropping handle"
                ),
            }
        }
    }
}

/// The daemon's queue pairs plus ownership of every allocated queue.
pub struct QueueTopology {
    download_primary: Arc<Queue>,
    download_secondary: Arc<Queue>,
    upload_secondary: Arc<Queue>,
    download: QueuePair,
    upload: QueuePair,
    allocated: AllocatedQueues,
}

impl fmt::Debug for QueueTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<String> = self
            .allocated
            .queues
            .iter()
            .map(|(slot, _)| slot.to_string())
            .collect();
        f.debug_struct("QueueTopology")
            .field("download", &self.download)
            .field("upload", &self.upload)
            .field("allocated", &slots)
            .finish()
    }
}

impl QueueTopology {
    /// Upload has no primary queue.
    pub(crate) fn new(
        download_primary: Arc<Queue>,
        download_secondary: Arc<Queue>,
        upload_secondary: Arc<Queue>,
        allocated: AllocatedQueues,
    ) -> Self {
        Self {
            download: QueuePair::new(
                Some(Arc::clone(&download_primary)),
                Some(Arc::clone(&download_secondary)),
            ),
            upload: QueuePair::new(None, Some(Arc::clone(&upload_secondary))),
            download_primary,
            download_secondary,
            upload_secondary,
            allocated,
        }
    }

    pub fn queue(&self, slot: QueueSlot) -> &Arc<Queue> {
        match slot {
            QueueSlot::DownloadPrimary => &self.download_primary,
            QueueSlot::DownloadSecondary => &self.download_secondary,
            QueueSlot::UploadSecondary => &self.upload_secondary,
        }
    }

    pub fn download(&self) -> &QueuePair {
        &self.download
    }

    pub fn upload(&self) -> &QueuePair {
        &self.upload
    }

    pub fn wake(&self) {
        self.download.wake();
        self.upload.wake();
    }

    /// Releases every queue in reverse allocation order. Shared segments stay
    /// on disk.
    pub fn teardown(self) {
        let Self {
            download_primary,
            download_secondary,
            upload_secondary,
            download,
            upload,
            allocated,
        } = self;
        drop((download, upload));
        drop((download_primary, download_secondary, upload_secondary));
        allocated.release_all();
    }
}
