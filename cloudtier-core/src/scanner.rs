use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

use crate::backend::is_transfer_temp;
use crate::config::ScanConfig;
use crate::error::{Result, TieringError};
use crate::failure::FailureCounter;
use crate::orchestration::{Heartbeat, Routine};
use crate::policy::{Classification, Policy};
use crate::queue::{Doorbell, PathEntry, Queue};

/// Longest the scanner sleeps between heartbeats while waiting to rescan.
const HEARTBEAT_SLICE: Duration = Duration::from_secs(1);

/// Counters for one pass over the governed tree.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub visited: usize,
    pub demoted: usize,
    pub promoted: usize,
    pub skipped: usize,
}

/// Producer that walks the governed tree and queues files for transfer.
pub struct Scanner {
    config: ScanConfig,
    policy: Arc<dyn Policy>,
    demote_to: Arc<Queue>,
    promote_to: Arc<Queue>,
    failures: Arc<FailureCounter>,
    heartbeat: Arc<Heartbeat>,
    rescan: Doorbell,
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("root", &self.config.root)
            .field("demote_to", &self.demote_to.label())
            .field("promote_to", &self.promote_to.label())
            .field("failures", &self.failures.count())
            .finish()
    }
}

impl Scanner {
    pub fn new(
        config: ScanConfig,
        policy: Arc<dyn Policy>,
        demote_to: Arc<Queue>,
        promote_to: Arc<Queue>,
        failures: Arc<FailureCounter>,
        heartbeat: Arc<Heartbeat>,
    ) -> Self {
        Self {
            config,
            policy,
            demote_to,
            promote_to,
            failures,
            heartbeat,
            rescan: Doorbell::new(),
        }
    }

    /// Walks the tree once. Fails only when the root itself cannot be read
    /// or the pass is cancelled.
    pub fn scan_cycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ScanSummary> {
        let root = &self.config.root;
        let started = Instant::now();
        let mut summary = ScanSummary::default();

        tracing::debug!(
            target: "cloudtier::scan",
            root = %root.display(),
            "starting scan cycle"
        );

        let walker = WalkDir::new(root)
            .follow_links(self.config.follow_links)
            .same_file_system(self.config.same_file_system);

        for entry in walker {
            if cancel.is_cancelled() {
                return Err(TieringError::Cancelled(
                    "scan cycle interrupted".into(),
                ));
            }
            self.heartbeat.beat();

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if err.depth() == 0 => return Err(err.into()),
                Err(err) => {
                    tracing::debug!(
                        target: "cloudtier::scan",
                        error = %err,
                        "skipping unreadable entry"
                    );
                    summary.skipped += 1;
                    continue;
                }
            };

            if !entry.file_type().is_file() || is_transfer_temp(entry.path()) {
                continue;
            }
            summary.visited += 1;
            self.visit(&entry, cancel, &mut summary)?;
        }

        tracing::debug!(
            target: "cloudtier::scan",
            visited = summary.visited,
            demoted = summary.demoted,
            promoted = summary.promoted,
            skipped = summary.skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "scan cycle complete"
        );
        Ok(summary)
    }

    fn visit(
        &self,
        entry: &DirEntry,
        cancel: &CancellationToken,
        summary: &mut ScanSummary,
    ) -> Result<()> {
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(err) => {
                tracing::debug!(
                    target: "cloudtier::scan",
                    path = %entry.path().display(),
                    error = %err,
                    "metadata unavailable"
                );
                summary.skipped += 1;
                return Ok(());
            }
        };

        let classification = self.policy.classify(entry.path(), &metadata);
        let (queue, counter) = match classification {
            Classification::None => return Ok(()),
            Classification::Demote => {
                (&self.demote_to, &mut summary.demoted)
            }
            Classification::Promote => {
                (&self.promote_to, &mut summary.promoted)
            }
        };

        match enqueue(queue, entry.path(), cancel) {
            Ok(()) => *counter += 1,
            Err(err @ TieringError::Cancelled(_)) => return Err(err),
            Err(err) => {
                tracing::debug!(
                    target: "cloudtier::scan",
                    path = %entry.path().display(),
                    queue = queue.label(),
                    error = %err,
                    "unable to queue file"
                );
                summary.skipped += 1;
            }
        }
        Ok(())
    }

    /// Scans until cancelled, pausing `rescan_interval` between cycles.
    pub fn run(&self, cancel: &CancellationToken) {
        tracing::info!(
            target: "cloudtier::scan",
            root = %self.config.root.display(),
            "scanner started"
        );

        while !cancel.is_cancelled() {
            self.heartbeat.beat();
            match self.scan_cycle(cancel) {
                Ok(_) => {}
                Err(TieringError::Cancelled(_)) => break,
                Err(err) => {
                    if let Some(count) = self.failures.record() {
                        tracing::warn!(
                            target: "cloudtier::scan",
                            failures = count,
                            error = %err,
                            "Failed to scan {} ({} failures so far)",
                            self.config.root.display(),
                            count
                        );
                    }
                }
            }
            self.pause(cancel);
        }

        tracing::info!(target: "cloudtier::scan", "scanner shutting down");
    }

    fn pause(&self, cancel: &CancellationToken) {
        let deadline = Instant::now() + self.config.rescan_interval();
        loop {
            let seen = self.rescan.generation();
            if cancel.is_cancelled() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            self.rescan
                .wait_since(seen, (deadline - now).min(HEARTBEAT_SLICE));
            self.heartbeat.beat();
        }
    }
}

impl Routine for Scanner {
    fn run(&self, cancel: &CancellationToken) {
        Scanner::run(self, cancel);
    }

    fn wake(&self) {
        self.rescan.ring();
        self.demote_to.wake_all();
        self.promote_to.wake_all();
    }

    fn heartbeat(&self) -> &Arc<Heartbeat> {
        &self.heartbeat
    }
}

fn enqueue(
    queue: &Queue,
    path: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let entry = PathEntry::new(path)?;
    queue.push_or_cancel(&entry, cancel)
}
