//! Consumer loop shared by the download and upload workers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::{StorageBackend, TransferKind};
use crate::error::Result;
use crate::failure::FailureCounter;
use crate::orchestration::{Heartbeat, Routine};
use crate::queue::{PathEntry, QueuePair};

/// Which queue of the pair an entry came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueSide {
    Primary,
    Secondary,
}

/// Result of a single scheduler iteration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// Both queues were empty.
    Idle,
    Transferred {
        side: QueueSide,
        entry: PathEntry,
    },
    /// The transfer or the dequeue failed. `reported` carries the cumulative
    /// failure count when this failure emitted a diagnostic.
    Failed {
        side: Option<QueueSide>,
        reported: Option<u64>,
    },
}

/// Drains a [`QueuePair`] into a storage backend, primary first.
pub struct TransferScheduler {
    kind: TransferKind,
    queues: QueuePair,
    backend: Arc<dyn StorageBackend>,
    failures: Arc<FailureCounter>,
    heartbeat: Arc<Heartbeat>,
    idle_tick: Duration,
}

impl fmt::Debug for TransferScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferScheduler")
            .field("kind", &self.kind)
            .field("queues", &self.queues)
            .field("failures", &self.failures.count())
            .field("idle_tick", &self.idle_tick)
            .finish()
    }
}

impl TransferScheduler {
    pub fn new(
        kind: TransferKind,
        queues: QueuePair,
        backend: Arc<dyn StorageBackend>,
        failures: Arc<FailureCounter>,
        heartbeat: Arc<Heartbeat>,
        idle_tick: Duration,
    ) -> Self {
        Self {
            kind,
            queues,
            backend,
            failures,
            heartbeat,
            idle_tick,
        }
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// Pops the primary queue, falling back to the secondary on a miss.
    pub fn poll_once(&self) -> Result<Option<(QueueSide, PathEntry)>> {
        if let Some(primary) = self.queues.primary()
            && let Some(entry) = primary.try_pop()?
        {
            return Ok(Some((QueueSide::Primary, entry)));
        }
        if let Some(secondary) = self.queues.secondary()
            && let Some(entry) = secondary.try_pop()?
        {
            return Ok(Some((QueueSide::Secondary, entry)));
        }
        Ok(None)
    }

    /// Runs one iteration without waiting.
    pub fn step(&self) -> StepOutcome {
        let (side, entry) = match self.poll_once() {
            Ok(Some(found)) => found,
            Ok(None) => return StepOutcome::Idle,
            Err(err) => {
                tracing::debug!(
                    target: "cloudtier::transfer",
                    kind = %self.kind,
                    error = %err,
                    "dequeue failed"
                );
                return StepOutcome::Failed {
                    side: None,
                    reported: self.record_failure(),
                };
            }
        };

        match self.kind.apply(self.backend.as_ref(), entry.as_path()) {
            Ok(()) => StepOutcome::Transferred { side, entry },
            Err(err) => {
                tracing::trace!(
                    target: "cloudtier::transfer",
                    path = %entry,
                    error = %err,
                    "transfer failed"
                );
                StepOutcome::Failed {
                    side: Some(side),
                    reported: self.record_failure(),
                }
            }
        }
    }

    /// Loops until `cancel` fires. Sleeps on the pair's doorbell while both
    /// queues are empty.
    pub fn run(&self, cancel: &CancellationToken) {
        let doorbell = Arc::clone(self.queues.doorbell());
        tracing::info!(
            target: "cloudtier::transfer",
            kind = %self.kind,
            "transfer worker started"
        );

        while !cancel.is_cancelled() {
            self.heartbeat.beat();
            let seen = doorbell.generation();
            if self.step() == StepOutcome::Idle {
                if cancel.is_cancelled() {
                    break;
                }
                doorbell.wait_since(seen, self.idle_tick);
            }
        }

        tracing::info!(
            target: "cloudtier::transfer",
            kind = %self.kind,
            "transfer worker shutting down"
        );
    }

    fn record_failure(&self) -> Option<u64> {
        let reported = self.failures.record();
        if let Some(count) = reported {
            tracing::warn!(
                target: "cloudtier::transfer",
                action = self.kind.action_name(),
                failures = count,
                "Failed to {} ({} failures so far)",
                self.kind.action_name(),
                count
            );
        }
        reported
    }
}

impl Routine for TransferScheduler {
    fn run(&self, cancel: &CancellationToken) {
        TransferScheduler::run(self, cancel);
    }

    fn wake(&self) {
        self.queues.wake();
    }

    fn heartbeat(&self) -> &Arc<Heartbeat> {
        &self.heartbeat
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};

    use std::time::Instant;

    use parking_lot::Mutex;
    use tracing_test::traced_test;

    use crate::error::TieringError;
    use crate::queue::{Queue, QueueOptions};

    #[derive(Default)]
    struct RecordingBackend {
        seen: Mutex<Vec<PathBuf>>,
        fail: bool,
    }

    impl StorageBackend for RecordingBackend {
        fn connect(&self) -> Result<()> {
            Ok(())
        }

        fn download(&self, path: &Path) -> Result<()> {
            self.seen.lock().push(path.to_path_buf());
            if self.fail {
                return Err(TieringError::transfer(
                    "download file",
                    path,
                    "remote unavailable",
                ));
            }
            Ok(())
        }

        fn upload(&self, path: &Path) -> Result<()> {
            self.download(path)
        }
    }

    fn queue() -> Arc<Queue> {
        Arc::new(Queue::create(QueueOptions::process_local(4096, 64)).unwrap())
    }

    fn entry(path: &str) -> PathEntry {
        PathEntry::try_from(path).unwrap()
    }

    fn scheduler(
        pair: QueuePair,
        backend: Arc<RecordingBackend>,
    ) -> TransferScheduler {
        TransferScheduler::new(
            TransferKind::Download,
            pair,
            backend,
            Arc::new(FailureCounter::new()),
            Arc::new(Heartbeat::new()),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn primary_wins_over_secondary() {
        let primary = queue();
        let secondary = queue();
        secondary.push(&entry("/b")).unwrap();
        primary.push(&entry("/a")).unwrap();

        let backend = Arc::new(RecordingBackend::default());
        let scheduler = scheduler(
            QueuePair::new(
                Some(Arc::clone(&primary)),
                Some(Arc::clone(&secondary)),
            ),
            Arc::clone(&backend),
        );

        assert_eq!(
            scheduler.step(),
            StepOutcome::Transferred {
                side: QueueSide::Primary,
                entry: entry("/a")
            }
        );
        assert_eq!(
            scheduler.step(),
            StepOutcome::Transferred {
                side: QueueSide::Secondary,
                entry: entry("/b")
            }
        );
        assert_eq!(scheduler.step(), StepOutcome::Idle);
        assert_eq!(
            *backend.seen.lock(),
            vec![PathBuf::from("/a"), PathBuf::from("/b")]
        );
    }

    #[test]
    fn falls_back_to_secondary_without_primary() {
        let secondary = queue();
        secondary.push(&entry("/only")).unwrap();
        let backend = Arc::new(RecordingBackend::default());
        let pair = QueuePair::new(None, Some(secondary));
        let scheduler = scheduler(pair, backend);

        assert_eq!(
            scheduler.step(),
            StepOutcome::Transferred {
                side: QueueSide::Secondary,
                entry: entry("/only")
            }
        );
    }

    #[test]
    #[traced_test]
    fn reports_every_1024th_failure() {
        let secondary = queue();
        let backend = Arc::new(RecordingBackend {
            fail: true,
            ..Default::default()
        });
        let pair = QueuePair::new(None, Some(Arc::clone(&secondary)));
        let scheduler = scheduler(pair, backend);

        let mut reports = Vec::new();
        for round in 0..2 {
            for i in 0..1024 {
                secondary
                    .push(&entry(&format!("/poison/{round}/{i}")))
                    .unwrap();
            }
            for _ in 0..1024 {
                if let StepOutcome::Failed {
                    reported: Some(count),
                    ..
                } = scheduler.step()
                {
                    reports.push(count);
                }
            }
        }

        assert_eq!(reports, vec![1024, 2048]);
        logs_assert(|lines: &[&str]| {
            let warnings: Vec<&&str> = lines
                .iter()
                .filter(|line| line.contains("Failed to download file"))
                .collect();
            if warnings.len() != 2 {
                return Err(format!(
                    "expected 2 failure reports, got {}",
                    warnings.len()
                ));
            }
            if !warnings[0].contains("1024 failures so far")
                || !warnings[1].contains("2048 failures so far")
            {
                return Err(format!("unexpected reports: {warnings:?}"));
            }
            Ok(())
        });
    }

    #[test]
    fn run_wakes_on_push_and_stops_on_cancel() {
        let secondary = queue();
        let backend = Arc::new(RecordingBackend::default());
        let pair = QueuePair::new(None, Some(Arc::clone(&secondary)));
        let scheduler = Arc::new(TransferScheduler::new(
            TransferKind::Upload,
            pair.clone(),
            Arc::clone(&backend) as Arc<dyn StorageBackend>,
            Arc::new(FailureCounter::new()),
            Arc::new(Heartbeat::new()),
            Duration::from_secs(60),
        ));
        let cancel = CancellationToken::new();

        let worker = {
            let scheduler = Arc::clone(&scheduler);
            let cancel = cancel.clone();
            std::thread::spawn(move || scheduler.run(&cancel))
        };

        secondary.push(&entry("/late")).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while backend.seen.lock().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*backend.seen.lock(), vec![PathBuf::from("/late")]);

        cancel.cancel();
        pair.wake();
        worker.join().unwrap();
    }
}
