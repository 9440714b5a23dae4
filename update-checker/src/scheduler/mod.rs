mod worker;

pub use worker::CheckOutcome;

use crate::cache::RequestCache;
use crate::checker::{ApiQuota, CheckerEntry, Registry};
use crate::db::Database;
use crate::error::CheckerError;
use crate::fetch::HttpClient;
use crate::notify::Messenger;
use crate::statistics::{FailureReport, Statistics};
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const PROXY_RETRY_DELAY: Duration = Duration::from_secs(60);

pub const DEFAULT_CONSECUTIVE_FAILURE_LIMIT: NonZeroUsize = NonZeroUsize::new(5).unwrap();
pub const DEFAULT_CUMULATIVE_FAILURE_LIMIT: NonZeroUsize = NonZeroUsize::new(10).unwrap();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel { workers: NonZeroUsize },
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub mode: ExecutionMode,
    /// Pause between two checks in sequential mode.
    pub item_delay: Duration,
    /// Pause between two cycles.
    pub interval: Duration,
    pub consecutive_failure_limit: NonZeroUsize,
    pub cumulative_failure_limit: NonZeroUsize,
    /// Treat every successful check as an update.
    pub force: bool,
    pub destination: String,
    /// Probed before the first cycle until it answers.
    pub proxy_probe_url: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            item_delay: Duration::from_secs(2),
            interval: Duration::from_secs(6 * 60 * 60),
            consecutive_failure_limit: DEFAULT_CONSECUTIVE_FAILURE_LIMIT,
            cumulative_failure_limit: DEFAULT_CUMULATIVE_FAILURE_LIMIT,
            force: false,
            destination: String::new(),
            proxy_probe_url: None,
        }
    }
}

/// Outcome of one full cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub statistics: Statistics,
    /// The first pass crossed a failure threshold and was cut short.
    pub outage: bool,
    /// Second, uncached pass over the items that failed.
    pub retry: Option<Statistics>,
}

impl CycleReport {
    /// Failures left at the end of the cycle.
    pub fn final_failures(&self) -> &[FailureReport] {
        match &self.retry {
            Some(retry) => &retry.failures,
            None => &self.statistics.failures,
        }
    }

    /// Identities that still failed at the end of the cycle.
    pub fn still_failing(&self) -> Vec<&str> {
        self.final_failures()
            .iter()
            .map(|failure| failure.checker_id.as_str())
            .collect()
    }

    pub fn log_summary(&self) {
        let (retry_updated, retry_unchanged) = self
            .retry
            .as_ref()
            .map_or((0, 0), |r| (r.updated.len(), r.unchanged));

        tracing::info!("Updated: {}", self.statistics.updated.len() + retry_updated);
        tracing::info!("Unchanged: {}", self.statistics.unchanged + retry_unchanged);
        tracing::info!("Recovered on retry: {}", retry_updated + retry_unchanged);

        let still_failing = self.still_failing();
        if !still_failing.is_empty() {
            tracing::warn!(
                "Failed checks ({} network failures in the first pass): {}",
                self.statistics.transient_failures(),
                still_failing.join(", ")
            );
            for failure in self.final_failures() {
                tracing::warn!("  {}: {}", failure.checker_id, failure.error);
            }
        }
    }
}

/// Drives every registered checker through its lifecycle, cycle after cycle.
///
/// Cloning is cheap; clones share the cache, database and shutdown signal.
#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<Registry>,
    database: Database,
    http: HttpClient,
    cache: Arc<RequestCache>,
    messenger: Option<Arc<Messenger>>,
    config: Arc<SchedulerConfig>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        registry: Registry,
        database: Database,
        http: HttpClient,
        cache: Arc<RequestCache>,
        messenger: Option<Arc<Messenger>>,
        config: SchedulerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            database,
            http,
            cache,
            messenger,
            config: Arc::new(config),
            shutdown,
        }
    }

    /// Drop saved state of checkers that are no longer registered.
    pub async fn prune(&self) -> Result<BTreeSet<String>, CheckerError> {
        tracing::info!("Run database cleanup before start");
        let removed = self.database.delete_missing(&self.registry.ids()).await?;

        let removed_list: Vec<&str> = removed.iter().map(String::as_str).collect();
        tracing::info!("Abandoned items: {{{}}}", removed_list.join(", "));

        Ok(removed)
    }

    /// Loop forever; only returns on a fatal error or shutdown.
    pub async fn run(&self) -> Result<(), CheckerError> {
        self.prune().await?;
        self.warn_about_quotas();
        self.wait_for_proxy().await?;

        loop {
            let report = self.run_cycle().await?;
            report.log_summary();

            let next = chrono::Local::now()
                + chrono::Duration::from_std(self.config.interval).unwrap_or_default();
            tracing::info!("The next check will start at {}", next.format(TIME_FORMAT));

            self.sleep(self.config.interval).await?;
        }
    }

    /// One full cycle: pending notifications, every active checker, a retry
    /// pass for failures. The request cache is cleared however it ends.
    pub async fn run_cycle(&self) -> Result<CycleReport, CheckerError> {
        tracing::info!("{}", "=".repeat(64));
        tracing::info!("Start checking at {}", chrono::Local::now().format(TIME_FORMAT));

        if let Some(messenger) = &self.messenger {
            messenger.retry_pending().await;
        }

        let result = self.run_checks(&self.registry.active()).await;
        self.cache.clear();

        if let Some(messenger) = &self.messenger {
            let pending = messenger.pending().len();
            if pending > 0 {
                tracing::warn!("{} messages are waiting to be resent next cycle", pending);
            }
        }

        tracing::info!("End of check");
        result
    }

    /// Check a single checker by identity, bypassing the request cache.
    pub async fn check_one(&self, id: &str) -> Result<CheckOutcome, CheckerError> {
        let entry = self
            .registry
            .get(id)
            .ok_or_else(|| CheckerError::UnknownChecker(id.to_owned()))?;

        match self.attempt_or_abort(entry, false).await {
            None => Err(CheckerError::Aborted("shutdown requested")),
            Some(result) => Ok(result?),
        }
    }

    async fn run_checks(&self, entries: &[CheckerEntry]) -> Result<CycleReport, CheckerError> {
        let pass = match self.config.mode {
            ExecutionMode::Sequential => self.run_sequential(entries, true).await,
            ExecutionMode::Parallel { workers } => self.run_parallel(entries, workers).await,
        };

        if pass.aborted {
            return Err(CheckerError::Aborted("shutdown requested"));
        }

        let mut report = CycleReport {
            statistics: pass.statistics,
            outage: pass.outage,
            retry: None,
        };

        if report.outage {
            tracing::warn!("Network or proxy error! Skipping the rest of this cycle");
            return Ok(report);
        }

        let failed: Vec<CheckerEntry> = report
            .statistics
            .failed_ids()
            .filter_map(|id| self.registry.get(id).cloned())
            .collect();

        if !failed.is_empty() {
            tracing::info!("Check again for failed items");

            let retry = self.run_sequential(&failed, false).await;
            if retry.aborted {
                return Err(CheckerError::Aborted("shutdown requested"));
            }
            report.retry = Some(retry.statistics);
        }

        Ok(report)
    }

    fn warn_about_quotas(&self) {
        for (quota, per_hour) in quota_overruns(&self.registry.active(), self.config.interval) {
            tracing::warn!("{}", "#".repeat(72));
            tracing::warn!(
                "{} checkers would send about {} requests per hour to the {} API,",
                quota.api,
                per_hour,
                quota.api
            );
            tracing::warn!("which exceeds its rate limit of {} per hour.", quota.per_hour);
            tracing::warn!("Remove some of them or increase the check interval.");
            tracing::warn!("{}", "#".repeat(72));
        }
    }

    async fn wait_for_proxy(&self) -> Result<(), CheckerError> {
        let Some(url) = self.config.proxy_probe_url.as_deref() else {
            return Ok(());
        };

        tracing::info!("Check whether the proxy is working properly");
        while let Err(err) = self.http.probe(url).await {
            tracing::warn!(
                "The proxy does not seem to be working properly ({}), try again in {} seconds...",
                err,
                PROXY_RETRY_DELAY.as_secs()
            );
            self.sleep(PROXY_RETRY_DELAY).await?;
        }
        tracing::info!("OK, the proxy works fine");

        Ok(())
    }

    async fn sleep(&self, duration: Duration) -> Result<(), CheckerError> {
        tokio::select! {
            _ = self.shutdown.cancelled() => {
                tracing::warn!("Shutdown requested while sleeping, aborting");
                Err(CheckerError::Aborted("shutdown requested"))
            }
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

/// Rate-limited APIs that `entries` would overrun when checked once per
/// `interval`, with the hourly request count they would reach.
fn quota_overruns(entries: &[CheckerEntry], interval: Duration) -> Vec<(ApiQuota, u64)> {
    let mut checks: BTreeMap<&'static str, (ApiQuota, u64)> = BTreeMap::new();
    for quota in entries.iter().filter_map(CheckerEntry::api_quota) {
        checks.entry(quota.api).or_insert((quota, 0)).1 += 1;
    }

    let interval = interval.as_secs().max(1);
    checks
        .into_values()
        .map(|(quota, count)| (quota, count * 3600 / interval))
        .filter(|(quota, per_hour)| *per_hour >= quota.per_hour)
        .collect()
}

#[cfg(test)]
mod tests;
