//! Startup, supervision and teardown of the daemon's queues and workers.
//!
//! Startup runs in two phases. [`Daemon::init_data`] allocates the queues in
//! a fixed order and connects the storage backend; [`Daemon::start_routines`]
//! spawns the worker threads. A failure in either phase releases everything
//! acquired so far in reverse order before the error is returned.

mod supervisor;
mod topology;
mod worker;

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backend::{StorageBackend, TransferKind};
use crate::config::{PromoteTarget, TieringConfig};
use crate::error::Result;
use crate::failure::FailureCounter;
use crate::policy::Policy;
use crate::queue::Queue;
use crate::scanner::Scanner;
use crate::transfer::TransferScheduler;

pub use supervisor::{RunningDaemon, WorkerStatus};
pub use topology::{
    QueueAllocator, QueueSlot, QueueTopology, SystemQueueAllocator,
};
pub use worker::{
    Heartbeat, Routine, ThreadSpawner, WorkerBody, WorkerRole, WorkerSpawner,
};

use supervisor::SupervisedWorker;
use topology::AllocatedQueues;

/// Owns the collaborators needed to bring the daemon up.
pub struct Daemon {
    config: TieringConfig,
    backend: Arc<dyn StorageBackend>,
    policy: Arc<dyn Policy>,
    allocator: Arc<dyn QueueAllocator>,
    spawner: Arc<dyn WorkerSpawner>,
}

impl fmt::Debug for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    pub fn new(
        config: TieringConfig,
        backend: Arc<dyn StorageBackend>,
        policy: Arc<dyn Policy>,
    ) -> Self {
        Self {
            config,
            backend,
            policy,
            allocator: Arc::new(SystemQueueAllocator),
            spawner: Arc::new(ThreadSpawner),
        }
    }

    pub fn with_allocator(
        mut self,
        allocator: Arc<dyn QueueAllocator>,
    ) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn WorkerSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn config(&self) -> &TieringConfig {
        &self.config
    }

    /// Allocates download-primary, download-secondary and upload-secondary,
    /// then connects the backend. The backend is never contacted if any
    /// queue fails to allocate.
    pub fn init_data(&self) -> Result<QueueTopology> {
        let mut allocated = AllocatedQueues::new(Arc::clone(&self.allocator));
        let (download_primary, download_secondary, upload_secondary) =
            match self.allocate_queues(&mut allocated) {
                Ok(queues) => queues,
                Err(err) => {
                    allocated.release_all();
                    return Err(err);
                }
            };
        let topology = QueueTopology::new(
            download_primary,
            download_secondary,
            upload_secondary,
            allocated,
        );

        if let Err(err) = self.backend.connect() {
            tracing::error!(
                target: "cloudtier::startup",
                error = %err,
                "storage backend connection failed"
            );
            topology.teardown();
            return Err(err);
        }

        tracing::info!(
            target: "cloudtier::startup",
            "queues allocated and storage backend connected"
        );
        Ok(topology)
    }

    fn allocate_queues(
        &self,
        allocated: &mut AllocatedQueues,
    ) -> Result<(Arc<Queue>, Arc<Queue>, Arc<Queue>)> {
        let queues = &self.config.queues;
        let mut next =
            |slot: QueueSlot| allocated.allocate(slot, slot.options(queues));
        Ok((
            next(QueueSlot::DownloadPrimary)?,
            next(QueueSlot::DownloadSecondary)?,
            next(QueueSlot::UploadSecondary)?,
        ))
    }

    /// Spawns the scanner and both transfer workers. On a spawn failure the
    /// workers already running are stopped and joined and the topology is
    /// torn down.
    pub fn start_routines(
        &self,
        topology: QueueTopology,
    ) -> Result<RunningDaemon> {
        let cancel = CancellationToken::new();
        let mut workers: Vec<SupervisedWorker> =
            Vec::with_capacity(WorkerRole::ALL.len());

        for role in WorkerRole::ALL {
            let routine = self.build_routine(role, &topology);
            let spawner = self.spawner.as_ref();
            match SupervisedWorker::start(role, routine, spawner, &cancel) {
                Ok(worker) => workers.push(worker),
                Err(err) => {
                    tracing::error!(
                        target: "cloudtier::startup",
                        role = %role,
                        error = %err,
                        "worker spawn failed; rolling back"
                    );
                    cancel.cancel();
                    for worker in &workers {
                        worker.wake();
                    }
                    topology.wake();
                    for worker in workers {
                        worker.join();
                    }
                    topology.teardown();
                    return Err(err);
                }
            }
        }

        tracing::info!(
            target: "cloudtier::startup",
            workers = workers.len(),
            "worker routines started"
        );
        Ok(RunningDaemon::new(
            self.config.supervisor,
            cancel,
            topology,
            workers,
            Arc::clone(&self.spawner),
        ))
    }

    fn build_routine(
        &self,
        role: WorkerRole,
        topology: &QueueTopology,
    ) -> Arc<dyn Routine> {
        let failures = Arc::new(FailureCounter::new());
        let heartbeat = Arc::new(Heartbeat::new());
        let idle_tick = self.config.scheduler.idle_tick();

        match role {
            WorkerRole::Scanner => {
                let promote_slot = match self.config.scan.promote_into {
                    PromoteTarget::Primary => QueueSlot::DownloadPrimary,
                    PromoteTarget::Secondary => QueueSlot::DownloadSecondary,
                };
                Arc::new(Scanner::new(
                    self.config.scan.clone(),
                    Arc::clone(&self.policy),
                    Arc::clone(topology.queue(QueueSlot::UploadSecondary)),
                    Arc::clone(topology.queue(promote_slot)),
                    failures,
                    heartbeat,
                ))
            }
            WorkerRole::Download => Arc::new(TransferScheduler::new(
                TransferKind::Download,
                topology.download().clone(),
                Arc::clone(&self.backend),
                failures,
                heartbeat,
                idle_tick,
            )),
            WorkerRole::Upload => Arc::new(TransferScheduler::new(
                TransferKind::Upload,
                topology.upload().clone(),
                Arc::clone(&self.backend),
                failures,
                heartbeat,
                idle_tick,
            )),
        }
    }
}
