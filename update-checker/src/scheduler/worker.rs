use super::Scheduler;
use crate::checker::{CheckRun, CheckerEntry};
use crate::error::{CheckError, FailureKind};
use crate::statistics::{Statistics, StatisticsCollector, StatisticsSender};
use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument as _;
use tracing_indicatif::span_ext::IndicatifSpanExt as _;
use tracing_indicatif::style::ProgressStyle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Updated,
    Unchanged,
}

/// Result of one pass over a list of checkers.
pub(super) struct Pass {
    pub statistics: Statistics,
    /// A failure threshold was crossed and the pass stopped early.
    pub outage: bool,
    /// Shutdown was requested during the pass.
    pub aborted: bool,
}

impl Scheduler {
    /// Run `do_check` on a fresh checker instance and compare with the saved
    /// record. Hands the run back only when it found an update.
    async fn detect(&self, entry: &CheckerEntry, use_cache: bool) -> Result<Option<CheckRun>, CheckError> {
        let cache = use_cache.then(|| self.cache.clone());
        let mut run = CheckRun::new(entry.instantiate(), &self.http, cache);

        run.check().await?;

        let saved = self.database.get(entry.id()).await?;
        if !run.evaluate(saved.as_ref(), self.config.force)? {
            tracing::info!("{} no update", entry.id());
            return Ok(None);
        }

        let version = run.snapshot()?.latest_version().unwrap_or_default().to_owned();
        tracing::info!("{} has update: {}", entry.id(), version);

        Ok(Some(run))
    }

    /// Enrich, persist and announce a detected update.
    async fn deliver(&self, mut run: CheckRun) -> Result<CheckOutcome, CheckError> {
        run.finalize().await?;
        run.persist(&self.database).await?;

        if let Some(messenger) = &self.messenger {
            run.notify(messenger, &self.config.destination).await?;
        }

        Ok(CheckOutcome::Updated)
    }

    /// Drive one checker through its whole lifecycle.
    ///
    /// Shutdown only interrupts detection. A detected update is always
    /// persisted and announced. Returns `None` if shutdown won.
    #[tracing::instrument(skip_all, fields(checker = entry.id()))]
    pub(super) async fn attempt_or_abort(
        &self,
        entry: &CheckerEntry,
        use_cache: bool,
    ) -> Option<Result<CheckOutcome, CheckError>> {
        let detected = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return None,
            detected = self.detect(entry, use_cache) => detected,
        };

        Some(match detected {
            Ok(Some(run)) => self.deliver(run).await,
            Ok(None) => Ok(CheckOutcome::Unchanged),
            Err(err) => Err(err),
        })
    }

    /// Check `entries` one after another.
    ///
    /// Stops early after `consecutive_failure_limit` transient failures in a
    /// row; any success resets the count.
    pub(super) async fn run_sequential(&self, entries: &[CheckerEntry], use_cache: bool) -> Pass {
        let collector = StatisticsCollector::new();
        let statistics = collector.sender();
        let limit = self.config.consecutive_failure_limit.get();

        let mut consecutive = 0;
        let mut outage = false;
        let mut aborted = false;

        for (index, entry) in entries.iter().enumerate() {
            let delay = self.config.item_delay;
            if index > 0 && !delay.is_zero() && self.sleep(delay).await.is_err() {
                aborted = true;
                break;
            }

            let Some(result) = self.attempt_or_abort(entry, use_cache).await else {
                aborted = true;
                break;
            };

            match result {
                Ok(outcome) => {
                    consecutive = 0;
                    record_outcome(&statistics, entry, outcome);
                }
                Err(err) => {
                    log_failure(entry, &err);
                    statistics.send_failed(entry.id(), &err);

                    if err.kind().is_transient() {
                        consecutive += 1;
                        if consecutive >= limit {
                            tracing::warn!(
                                "{} consecutive network failures, stopping this pass",
                                consecutive
                            );
                            outage = true;
                            break;
                        }
                    }
                }
            }
        }

        drop(statistics);
        Pass {
            statistics: collector.finish().await,
            outage,
            aborted: aborted || self.shutdown.is_cancelled(),
        }
    }

    /// Check `entries` on a bounded pool of workers sharing one queue.
    ///
    /// Once `cumulative_failure_limit` transient failures have been seen in
    /// total, no worker picks up another entry. Checks already running are
    /// left to finish.
    pub(super) async fn run_parallel(&self, entries: &[CheckerEntry], workers: NonZeroUsize) -> Pass {
        let collector = StatisticsCollector::new();
        let tally = Arc::new(FailureTally::new(self.config.cumulative_failure_limit.get()));
        let queue = Arc::new(Mutex::new(entries.iter().cloned().collect::<VecDeque<_>>()));
        let stop = self.shutdown.child_token();
        let tracker = TaskTracker::new();

        let span = tracing::info_span!("checking");
        if let Ok(style) = ProgressStyle::with_template("{wide_bar} {pos}/{len}") {
            span.pb_set_style(&style);
        }
        span.pb_set_length(entries.len() as u64);

        for _ in 0..workers.get().min(entries.len()) {
            let worker = Worker {
                scheduler: self.clone(),
                queue: queue.clone(),
                tally: tally.clone(),
                stop: stop.clone(),
                statistics: collector.sender(),
                progress: span.clone(),
            };

            tracker.spawn(worker.run().instrument(span.clone()));
        }

        tracker.close();
        tracker.wait().await;

        Pass {
            statistics: collector.finish().await,
            outage: tally.exceeded(),
            aborted: self.shutdown.is_cancelled(),
        }
    }
}

struct Worker {
    scheduler: Scheduler,
    queue: Arc<Mutex<VecDeque<CheckerEntry>>>,
    tally: Arc<FailureTally>,
    stop: CancellationToken,
    statistics: StatisticsSender,
    progress: tracing::Span,
}

impl Worker {
    async fn run(self) {
        while !self.stop.is_cancelled() {
            let Some(entry) = self.next_entry() else {
                break;
            };

            let Some(result) = self.scheduler.attempt_or_abort(&entry, true).await else {
                break;
            };
            self.progress.pb_inc(1);

            match result {
                Ok(outcome) => record_outcome(&self.statistics, &entry, outcome),
                Err(err) => {
                    log_failure(&entry, &err);
                    self.statistics.send_failed(entry.id(), &err);

                    if err.kind().is_transient() && self.tally.record() {
                        tracing::warn!("Too many network failures, cancelling the remaining checks");
                        self.stop.cancel();
                    }
                }
            }
        }
    }

    fn next_entry(&self) -> Option<CheckerEntry> {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

/// Counts transient failures across all workers of a pass.
struct FailureTally {
    count: AtomicUsize,
    limit: usize,
}

impl FailureTally {
    fn new(limit: usize) -> Self {
        Self {
            count: AtomicUsize::new(0),
            limit,
        }
    }

    /// Record one failure; true if this one reached the limit.
    fn record(&self) -> bool {
        self.count.fetch_add(1, Ordering::SeqCst) + 1 == self.limit
    }

    fn exceeded(&self) -> bool {
        self.count.load(Ordering::SeqCst) >= self.limit
    }
}

fn record_outcome(statistics: &StatisticsSender, entry: &CheckerEntry, outcome: CheckOutcome) {
    match outcome {
        CheckOutcome::Updated => statistics.send_updated(entry.id()),
        CheckOutcome::Unchanged => statistics.send_unchanged(entry.id()),
    }
}

fn log_failure(entry: &CheckerEntry, err: &CheckError) {
    match err.kind() {
        FailureKind::Transient(kind) => {
            tracing::warn!("{} check failed ({}): {}", entry.id(), kind, err)
        }
        FailureKind::Permanent => tracing::error!("{} check failed: {:?}", entry.id(), err),
    }
}
