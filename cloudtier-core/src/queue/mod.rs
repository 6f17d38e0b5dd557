//! Bounded FIFO queues of path entries.
//!
//! A queue is either process-local (plain memory, empty on every launch) or
//! backed by a named segment that outlives the process and can be attached by
//! independent processes, e.g. `cloudtierctl` requesting an on-demand
//! promotion while the daemon is consuming.
//!
//! `try_pop` is the only dequeue operation and never blocks. Producers get
//! backpressure from `push`, which waits while the queue is full.

mod doorbell;
mod entry;
mod local;
mod pair;
mod segment;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TieringError};

pub use doorbell::Doorbell;
pub use entry::PathEntry;
pub use pair::QueuePair;

use local::LocalRing;
use segment::SharedSegment;

/// Where a queue keeps its slots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueBacking {
    /// Process memory; lost on exit.
    ProcessLocal,
    /// Named segment file under `dir`, shared across processes and restarts.
    Shared { dir: PathBuf, name: String },
}

/// Sizing and backing for [`Queue::create`].
#[derive(Clone, Debug)]
pub struct QueueOptions {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Maximum path length including the terminator byte.
    pub elem_capacity: usize,
    pub backing: QueueBacking,
    /// How often a producer blocked on a full queue re-checks for space that
    /// was freed without an in-process wake-up (pops from other processes).
    pub backpressure_tick: Duration,
}

impl QueueOptions {
    pub fn process_local(capacity: usize, elem_capacity: usize) -> Self {
        Self {
            capacity,
            elem_capacity,
            backing: QueueBacking::ProcessLocal,
            backpressure_tick: Duration::from_millis(250),
        }
    }

    pub fn shared(
        capacity: usize,
        elem_capacity: usize,
        dir: impl Into<PathBuf>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            capacity,
            elem_capacity,
            backing: QueueBacking::Shared {
                dir: dir.into(),
                name: name.into(),
            },
            backpressure_tick: Duration::from_millis(250),
        }
    }

    pub fn with_backpressure_tick(mut self, tick: Duration) -> Self {
        self.backpressure_tick = tick;
        self
    }
}

enum Backing {
    Local(LocalRing),
    Shared(SharedSegment),
}

impl Backing {
    fn push(&mut self, bytes: &[u8]) -> Result<bool> {
        match self {
            Backing::Local(ring) => Ok(ring.push(bytes)),
            Backing::Shared(segment) => segment.push(bytes),
        }
    }

    fn pop(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            Backing::Local(ring) => Ok(ring.pop()),
            Backing::Shared(segment) => segment.pop(),
        }
    }

    fn len(&mut self) -> Result<usize> {
        match self {
            Backing::Local(ring) => Ok(ring.len()),
            Backing::Shared(segment) => segment.len(),
        }
    }
}

/// A bounded, thread-safe FIFO of [`PathEntry`] values.
///
/// Locking is per queue. Shared queues additionally take an exclusive file
/// lock on their segment for each operation so other processes can push and
/// pop concurrently.
pub struct Queue {
    label: String,
    capacity: usize,
    elem_capacity: usize,
    backing_kind: QueueBacking,
    backpressure_tick: Duration,
    inner: Mutex<Backing>,
    space: Condvar,
    doorbells: Mutex<Vec<Arc<Doorbell>>>,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Queue");
        debug
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("elem_capacity", &self.elem_capacity)
            .field("backing", &self.backing_kind);

        // Shared depth needs the segment flock, which another process may
        // hold indefinitely.
        if let Some(guard) = self.inner.try_lock()
            && let Backing::Local(ring) = &*guard
        {
            debug.field("len", &ring.len());
        }

        debug.finish()
    }
}

impl Queue {
    /// Allocates a queue, or attaches to an existing compatible segment when
    /// the backing is shared.
    pub fn create(options: QueueOptions) -> Result<Self> {
        let label = match &options.backing {
            QueueBacking::ProcessLocal => "process-local".to_string(),
            QueueBacking::Shared { name, .. } => name.clone(),
        };

        if options.capacity == 0 {
            return Err(TieringError::Allocation {
                queue: label,
                reason: "capacity must be at least 1".into(),
            });
        }
        if options.elem_capacity < 2 {
            return Err(TieringError::Allocation {
                queue: label,
                reason: "element capacity must leave room for one byte"
                    .into(),
            });
        }

        let backing = match &options.backing {
            QueueBacking::ProcessLocal => {
                Backing::Local(LocalRing::allocate(&label, options.capacity)?)
            }
            QueueBacking::Shared { dir, name } => {
                validate_segment_name(name)?;
                Backing::Shared(SharedSegment::open(
                    dir,
                    name,
                    options.capacity,
                    options.elem_capacity,
                )?)
            }
        };

        Ok(Self {
            label,
            capacity: options.capacity,
            elem_capacity: options.elem_capacity,
            backing_kind: options.backing,
            backpressure_tick: options
                .backpressure_tick
                .max(Duration::from_millis(1)),
            inner: Mutex::new(backing),
            space: Condvar::new(),
            doorbells: Mutex::new(Vec::new()),
        })
    }

    /// Removes a named segment from disk. Returns `false` when it did not
    /// exist.
    pub fn unlink(dir: &Path, name: &str) -> Result<bool> {
        validate_segment_name(name)?;
        match std::fs::remove_file(dir.join(name)) {
            Ok(()) => {
                tracing::info!(
                    target: "cloudtier::queue",
                    queue = name,
                    "unlinked queue segment"
                );
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn elem_capacity(&self) -> usize {
        self.elem_capacity
    }

    pub fn backing(&self) -> &QueueBacking {
        &self.backing_kind
    }

    pub fn is_shared(&self) -> bool {
        matches!(self.backing_kind, QueueBacking::Shared { .. })
    }

    pub fn len(&self) -> Result<usize> {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Registers a doorbell rung after every successful push from this process.
    pub fn subscribe(&self, doorbell: Arc<Doorbell>) {
        self.doorbells.lock().push(doorbell);
    }

    /// Wakes producers blocked on a full queue so they re-check cancellation.
    pub fn wake_all(&self) {
        self.space.notify_all();
    }

    /// Non-blocking push; fails with [`TieringError::QueueFull`] when full.
    pub fn try_push(&self, entry: &PathEntry) -> Result<()> {
        self.check_size(entry)?;
        let pushed = self.inner.lock().push(entry.as_bytes())?;
        if !pushed {
            return Err(TieringError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.ring();
        Ok(())
    }

    /// Pushes, blocking while the queue is full.
    pub fn push(&self, entry: &PathEntry) -> Result<()> {
        self.push_until(entry, None, None)
    }

    /// Pushes, blocking while the queue is full, until `cancel` fires.
    pub fn push_or_cancel(
        &self,
        entry: &PathEntry,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.push_until(entry, Some(cancel), None)
    }

    /// Pushes, blocking while the queue is full for at most `timeout`.
    pub fn push_timeout(
        &self,
        entry: &PathEntry,
        timeout: Duration,
    ) -> Result<()> {
        self.push_until(entry, None, Some(Instant::now() + timeout))
    }

    /// Removes and returns the head entry, or `None` immediately when empty.
    pub fn try_pop(&self) -> Result<Option<PathEntry>> {
        let popped = self.inner.lock().pop()?;
        match popped {
            Some(bytes) => {
                self.space.notify_one();
                PathEntry::from_bytes(bytes).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Releases the handle. Shared segments stay on disk; see
    /// [`Queue::unlink`].
    pub fn destroy(self) {
        tracing::debug!(
            target: "cloudtier::queue",
            queue = %self.label,
            "destroying queue handle"
        );
        self.space.notify_all();
        match self.inner.into_inner() {
            Backing::Local(_) => {}
            Backing::Shared(segment) => {
                tracing::debug!(
                    target: "cloudtier::queue",
                    segment = %segment.path().display(),
                    "queue segment retained"
                );
                segment.close();
            }
        }
    }

    fn push_until(
        &self,
        entry: &PathEntry,
        cancel: Option<&CancellationToken>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        self.check_size(entry)?;
        loop {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return Err(TieringError::Cancelled(format!(
                    "push onto {} interrupted",
                    self.label
                )));
            }

            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(TieringError::QueueFull {
                            capacity: self.capacity,
                        });
                    }
                    (deadline - now).min(self.backpressure_tick)
                }
                None => self.backpressure_tick,
            };

            {
                let mut guard = self.inner.lock();
                if guard.push(entry.as_bytes())? {
                    drop(guard);
                    self.ring();
                    return Ok(());
                }
                let _ = self.space.wait_for(&mut guard, wait);
            }
        }
    }

    fn check_size(&self, entry: &PathEntry) -> Result<()> {
        if entry.stored_size() > self.elem_capacity {
            return Err(TieringError::EntryTooLarge {
                len: entry.len(),
                max: self.elem_capacity - 1,
            });
        }
        Ok(())
    }

    fn ring(&self) {
        for doorbell in self.doorbells.lock().iter() {
            doorbell.ring();
        }
    }
}

fn validate_segment_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(TieringError::InvalidConfig(format!(
            "queue segment name {name:?} must be a plain file name"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn entry(path: &str) -> PathEntry {
        PathEntry::try_from(path).unwrap()
    }

    fn single_slot() -> Arc<Queue> {
        Arc::new(Queue::create(QueueOptions::process_local(1, 64)).unwrap())
    }

    #[test]
    fn pops_in_push_order() {
        let queue = Queue::create(QueueOptions::process_local(8, 64)).unwrap();
        for path in ["/a", "/b", "/c", "/d"] {
            queue.push(&entry(path)).unwrap();
        }
        for path in ["/a", "/b", "/c", "/d"] {
            assert_eq!(queue.try_pop().unwrap(), Some(entry(path)));
        }
        assert_eq!(queue.try_pop().unwrap(), None);
    }

    #[test]
    fn empty_pop_is_a_repeatable_miss() {
        let queue = Queue::create(QueueOptions::process_local(2, 64)).unwrap();
        for _ in 0..3 {
            assert_eq!(queue.try_pop().unwrap(), None);
            assert_eq!(queue.len().unwrap(), 0);
        }
    }

    #[test]
    fn oversize_entry_is_rejected_at_push() {
        let queue = Queue::create(QueueOptions::process_local(2, 4)).unwrap();
        queue.push(&entry("/abc")).unwrap_err();
        let err = queue.try_push(&entry("/abcd")).unwrap_err();
        assert!(matches!(err, TieringError::EntryTooLarge { len: 5, max: 3 }));
        assert_eq!(queue.len().unwrap(), 0);
    }

    #[test]
    fn fits_exactly_at_element_capacity_minus_one() {
        let queue = Queue::create(QueueOptions::process_local(2, 4)).unwrap();
        queue.try_push(&entry("/ab")).unwrap();
        assert_eq!(queue.try_pop().unwrap(), Some(entry("/ab")));
    }

    #[test]
    fn zero_capacity_is_an_allocation_error() {
        let err =
            Queue::create(QueueOptions::process_local(0, 64)).unwrap_err();
        assert!(matches!(err, TieringError::Allocation { .. }));
        let err = Queue::create(QueueOptions::process_local(4, 1)).unwrap_err();
        assert!(matches!(err, TieringError::Allocation { .. }));
    }

    #[test]
    fn blocked_push_resumes_after_pop() {
        let queue = single_slot();
        queue.push(&entry("/first")).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push(&entry("/second")))
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(queue.try_pop().unwrap(), Some(entry("/first")));

        producer.join().unwrap().unwrap();
        assert_eq!(queue.try_pop().unwrap(), Some(entry("/second")));
    }

    #[test]
    fn cancelled_push_leaves_full_queue_untouched() {
        let queue = single_slot();
        queue.push(&entry("/kept")).unwrap();
        let token = CancellationToken::new();

        let producer = {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            thread::spawn(move || {
                queue.push_or_cancel(&entry("/dropped"), &token)
            })
        };

        thread::sleep(Duration::from_millis(30));
        token.cancel();
        queue.wake_all();

        let result = producer.join().unwrap();
        assert!(matches!(result, Err(TieringError::Cancelled(_))));
        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(queue.try_pop().unwrap(), Some(entry("/kept")));
    }

    #[test]
    fn push_timeout_reports_full() {
        let options = QueueOptions::process_local(1, 64)
            .with_backpressure_tick(Duration::from_millis(5));
        let queue = Queue::create(options).unwrap();
        queue.push(&entry("/only")).unwrap();
        let err = queue
            .push_timeout(&entry("/late"), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, TieringError::QueueFull { capacity: 1 }));
    }

    #[test]
    fn push_rings_subscribed_doorbells() {
        let queue = Queue::create(QueueOptions::process_local(4, 64)).unwrap();
        let bell = Arc::new(Doorbell::new());
        queue.subscribe(Arc::clone(&bell));
        let seen = bell.generation();
        queue.push(&entry("/x")).unwrap();
        assert_ne!(bell.generation(), seen);
    }

    #[test]
    fn shared_segment_name_must_be_plain() {
        let dir = tempfile::tempdir().unwrap();
        let options = QueueOptions::shared(4, 64, dir.path(), "a/b");
        let err = Queue::create(options).unwrap_err();
        assert!(matches!(err, TieringError::InvalidConfig(_)));
    }

    #[test]
    fn unrepresentable_element_capacity_is_an_allocation_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = QueueOptions::shared(1, usize::MAX, dir.path(), "q");
        let err = Queue::create(options).unwrap_err();
        assert!(matches!(err, TieringError::Allocation { .. }), "{err}");
        assert!(!dir.path().join("q").exists());
    }

    #[test]
    fn debug_does_not_wait_for_segment_lock() {
        use nix::fcntl::{Flock, FlockArg};

        let dir = tempfile::tempdir().unwrap();
        let options = QueueOptions::shared(4, 64, dir.path(), "q");
        let queue = Queue::create(options).unwrap();
        queue.try_push(&entry("/held")).unwrap();

        let other = std::fs::File::open(dir.path().join("q")).unwrap();
        let _held = Flock::lock(other, FlockArg::LockExclusive)
            .map_err(|(_, errno)| errno)
            .unwrap();

        let rendered = format!("{queue:?}");
        assert!(rendered.contains("\"q\""), "{rendered}");
        assert!(!rendered.contains("len:"), "{rendered}");
    }

    #[test]
    fn unlink_missing_segment_reports_false() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!Queue::unlink(dir.path(), "absent").unwrap());
    }
}
