use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// The long-running loops the daemon keeps alive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Scanner,
    Download,
    Upload,
}

impl WorkerRole {
    /// Spawn order at startup.
    pub const ALL: [WorkerRole; 3] =
        [WorkerRole::Scanner, WorkerRole::Download, WorkerRole::Upload];

    pub fn thread_name(self) -> &'static str {
        match self {
            WorkerRole::Scanner => "cloudtier-scan",
            WorkerRole::Download => "cloudtier-download",
            WorkerRole::Upload => "cloudtier-upload",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerRole::Scanner => write!(f, "scanner"),
            WorkerRole::Download => write!(f, "download"),
            WorkerRole::Upload => write!(f, "upload"),
        }
    }
}

/// Liveness stamp a worker refreshes at every loop boundary.
#[derive(Debug)]
pub struct Heartbeat {
    origin: Instant,
    last_ms: AtomicU64,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    pub fn beat(&self) {
        let elapsed = u64::try_from(self.origin.elapsed().as_millis())
            .unwrap_or(u64::MAX);
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last beat (or since creation).
    pub fn age(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// A blocking loop run on a dedicated worker thread.
pub trait Routine: Send + Sync {
    /// Runs until `cancel` fires.
    fn run(&self, cancel: &CancellationToken);

    /// Interrupts any wait the loop is parked in so it notices cancellation.
    fn wake(&self);

    fn heartbeat(&self) -> &Arc<Heartbeat>;
}

pub type WorkerBody = Box<dyn FnOnce() + Send + 'static>;

/// Starts worker threads. Swappable so startup failures can be exercised.
pub trait WorkerSpawner: Send + Sync {
    fn spawn(
        &self,
        role: WorkerRole,
        body: WorkerBody,
    ) -> io::Result<JoinHandle<()>>;
}

/// Spawns named OS threads.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSpawner;

impl WorkerSpawner for ThreadSpawner {
    fn spawn(
        &self,
        role: WorkerRole,
        body: WorkerBody,
    ) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(role.thread_name().to_string())
            .spawn(body)
    }
}

/// Builds the closure a worker thread executes for `routine`.
pub(crate) fn worker_body(
    routine: &Arc<dyn Routine>,
    cancel: &CancellationToken,
) -> WorkerBody {
    let routine = Arc::clone(routine);
    let cancel = cancel.clone();
    Box::new(move || routine.run(&cancel))
}

/// Renders a join error's panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
