use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::error::{Result, TieringError};

use super::topology::QueueTopology;
use super::worker::{
    Routine, WorkerRole, WorkerSpawner, panic_message, worker_body,
};

/// Point-in-time view of one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerStatus {
    pub role: WorkerRole,
    pub alive: bool,
    /// Restarts inside the current restart window.
    pub restarts: usize,
    pub heartbeat_age: Duration,
    pub stalled: bool,
}

pub(crate) struct SupervisedWorker {
    role: WorkerRole,
    routine: Arc<dyn Routine>,
    handle: Option<JoinHandle<()>>,
    restarts: VecDeque<Instant>,
    stalled: bool,
}

impl SupervisedWorker {
    pub(crate) fn start(
        role: WorkerRole,
        routine: Arc<dyn Routine>,
        spawner: &dyn WorkerSpawner,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        routine.heartbeat().beat();
        let handle = spawner
            .spawn(role, worker_body(&routine, cancel))
            .map_err(|source| TieringError::Spawn { role, source })?;
        Ok(Self {
            role,
            routine,
            handle: Some(handle),
            restarts: VecDeque::new(),
            stalled: false,
        })
    }

    pub(crate) fn wake(&self) {
        self.routine.wake();
    }

    pub(crate) fn join(mut self) {
        self.reap();
    }

    fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Joins the thread if there is one, logging a panic.
    fn reap(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if let Err(payload) = handle.join() {
            tracing::error!(
                target: "cloudtier::supervisor",
                role = %self.role,
                panic = %panic_message(payload.as_ref()),
                "worker panicked"
            );
        }
    }

    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            role: self.role,
            alive: !self.is_finished(),
            restarts: self.restarts.len(),
            heartbeat_age: self.routine.heartbeat().age(),
            stalled: self.stalled,
        }
    }
}

/// Records a restart attempt unless the role already used its budget inside
/// `window`.
fn admit_restart(
    history: &mut VecDeque<Instant>,
    now: Instant,
    window: Duration,
    max: usize,
) -> bool {
    while history
        .front()
        .is_some_and(|at| now.saturating_duration_since(*at) > window)
    {
        history.pop_front();
    }
    if history.len() >= max {
        return false;
    }
    history.push_back(now);
    true
}

/// The started daemon: worker threads plus the queues they share.
pub struct RunningDaemon {
    config: SupervisorConfig,
    cancel: CancellationToken,
    topology: QueueTopology,
    workers: Vec<SupervisedWorker>,
    spawner: Arc<dyn WorkerSpawner>,
}

impl fmt::Debug for RunningDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningDaemon")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("topology", &self.topology)
            .field("workers", &self.status())
            .finish()
    }
}

impl RunningDaemon {
    pub(crate) fn new(
        config: SupervisorConfig,
        cancel: CancellationToken,
        topology: QueueTopology,
        workers: Vec<SupervisedWorker>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        Self {
            config,
            cancel,
            topology,
            workers,
            spawner,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn topology(&self) -> &QueueTopology {
        &self.topology
    }

    pub fn status(&self) -> Vec<WorkerStatus> {
        self.workers.iter().map(SupervisedWorker::status).collect()
    }

    /// Runs supervision checks until `shutdown` completes or the daemon is
    /// cancelled. Returns an error when a worker exhausts its restart budget
    /// or cannot be respawned; the caller still owes a [`shutdown`].
    ///
    /// [`shutdown`]: RunningDaemon::shutdown
    pub async fn supervise<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let cancel = self.cancel.clone();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(
                        target: "cloudtier::supervisor",
                        "shutdown requested"
                    );
                    return Ok(());
                }
                () = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => self.check_workers()?,
            }
        }
    }

    /// One supervision pass: restarts dead workers and flags stalled ones.
    pub fn check_workers(&mut self) -> Result<()> {
        let now = Instant::now();
        let stall_threshold = self.config.stall_threshold();

        for worker in &mut self.workers {
            if worker.is_finished() {
                worker.reap();
                if self.cancel.is_cancelled() {
                    continue;
                }

                if !admit_restart(
                    &mut worker.restarts,
                    now,
                    self.config.restart_window(),
                    self.config.max_restarts,
                ) {
                    tracing::error!(
                        target: "cloudtier::supervisor",
                        role = %worker.role,
                        restarts = worker.restarts.len(),
                        "worker restart budget exhausted"
                    );
                    return Err(TieringError::WorkerExhausted {
                        role: worker.role,
                        restarts: worker.restarts.len(),
                    });
                }

                worker.routine.heartbeat().beat();
                let body = worker_body(&worker.routine, &self.cancel);
                let handle = self
                    .spawner
                    .spawn(worker.role, body)
                    .map_err(|source| TieringError::Spawn {
                        role: worker.role,
                        source,
                    })?;
                worker.handle = Some(handle);
                worker.stalled = false;
                tracing::warn!(
                    target: "cloudtier::supervisor",
                    role = %worker.role,
                    restarts = worker.restarts.len(),
                    "worker exited unexpectedly; restarted"
                );
                continue;
            }

            let age = worker.routine.heartbeat().age();
            if age > stall_threshold && !worker.stalled {
                worker.stalled = true;
                tracing::warn!(
                    target: "cloudtier::supervisor",
                    role = %worker.role,
                    heartbeat_age_ms = age.as_millis() as u64,
                    "worker appears stalled"
                );
            } else if age <= stall_threshold && worker.stalled {
                worker.stalled = false;
                tracing::info!(
                    target: "cloudtier::supervisor",
                    role = %worker.role,
                    "worker resumed"
                );
            }
        }
        Ok(())
    }

    /// Stops every worker, joins it, then releases the queues in reverse
    /// allocation order.
    pub fn shutdown(self) {
        let Self {
            cancel,
            topology,
            workers,
            ..
        } = self;

        tracing::info!(target: "cloudtier::supervisor", "stopping workers");
        cancel.cancel();
        for worker in &workers {
            worker.wake();
        }
        topology.wake();

        for worker in workers {
            let role = worker.role;
            worker.join();
            tracing::debug!(
                target: "cloudtier::supervisor",
                role = %role,
                "worker joined"
            );
        }

        topology.teardown();
        tracing::info!(target: "cloudtier::supervisor", "shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_budget_is_per_window() {
        let mut history = VecDeque::new();
        let start = Instant::now();
        let window = Duration::from_secs(10);
        let at = |secs| start + Duration::from_secs(secs);

        assert!(admit_restart(&mut history, start, window, 2));
        assert!(admit_restart(&mut history, at(1), window, 2));
        assert!(!admit_restart(&mut history, at(2), window, 2));

        // The first restart ages out of the window.
        assert!(admit_restart(&mut history, at(11), window, 2));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn zero_budget_never_restarts() {
        let mut history = VecDeque::new();
        let window = Duration::from_secs(1);
        assert!(!admit_restart(&mut history, Instant::now(), window, 0));
    }
}
