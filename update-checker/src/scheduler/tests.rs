use super::*;
use crate::cache::CacheKey;
use crate::checker::testing::{Behaviour, FakeChecker};
use crate::error::CheckError;
use crate::info::{InfoKey, InfoSnapshot};
use crate::notify::testing::ScriptedNotifier;
use std::sync::atomic::Ordering;

struct Harness {
    scheduler: Scheduler,
    database: Database,
    cache: Arc<RequestCache>,
    notifier: Arc<ScriptedNotifier>,
    shutdown: CancellationToken,
}

fn config(mode: ExecutionMode) -> SchedulerConfig {
    SchedulerConfig {
        mode,
        item_delay: Duration::ZERO,
        destination: "@updates".to_owned(),
        ..SchedulerConfig::default()
    }
}

async fn harness(fakes: &[FakeChecker], config: SchedulerConfig) -> Harness {
    harness_with(fakes, config, ScriptedNotifier::default()).await
}

async fn harness_with(
    fakes: &[FakeChecker],
    config: SchedulerConfig,
    notifier: ScriptedNotifier,
) -> Harness {
    let mut registry = Registry::new();
    for fake in fakes {
        let fake = fake.clone();
        registry.register(move || fake.clone()).unwrap();
    }

    let database = Database::in_memory().await.unwrap();
    let cache = Arc::new(RequestCache::new());
    let notifier = Arc::new(notifier);
    let messenger = Messenger::new(notifier.clone(), NonZeroUsize::new(1).unwrap());
    let shutdown = CancellationToken::new();

    let scheduler = Scheduler::new(
        registry,
        database.clone(),
        HttpClient::new(Duration::from_secs(1), None).unwrap(),
        cache.clone(),
        Some(Arc::new(messenger)),
        config,
        shutdown.clone(),
    );

    Harness {
        scheduler,
        database,
        cache,
        notifier,
        shutdown,
    }
}

fn runs(fake: &FakeChecker) -> usize {
    fake.runs.load(Ordering::SeqCst)
}

fn fakes(behaviours: &[Behaviour]) -> Vec<FakeChecker> {
    behaviours
        .iter()
        .enumerate()
        .map(|(i, behaviour)| FakeChecker::new(format!("c{i:02}"), *behaviour))
        .collect()
}

#[tokio::test]
async fn sequential_pass_stops_after_consecutive_network_failures() {
    use Behaviour::{Report as S, Transient as T};
    let fakes = fakes(&[T, T, T, T, S("1"), T, T, T, T, T, S("1"), S("1")]);
    let h = harness(&fakes, config(ExecutionMode::Sequential)).await;

    let report = h.scheduler.run_cycle().await.unwrap();

    assert!(report.outage);
    assert!(report.retry.is_none());
    assert!(fakes[..10].iter().all(|f| runs(f) == 1));
    assert_eq!(runs(&fakes[10]), 0);
    assert_eq!(runs(&fakes[11]), 0);
    assert_eq!(report.statistics.updated, vec!["c04"]);
    assert_eq!(report.statistics.transient_failures(), 9);
}

#[tokio::test]
async fn permanent_failures_are_retried_without_tripping_the_breaker() {
    let fakes = fakes(&[Behaviour::Permanent; 6]);
    let h = harness(&fakes, config(ExecutionMode::Sequential)).await;

    let report = h.scheduler.run_cycle().await.unwrap();

    assert!(!report.outage);
    assert!(fakes.iter().all(|f| runs(f) == 2));
    assert_eq!(report.still_failing().len(), 6);
    assert_eq!(
        report.final_failures()[0].error,
        "unexpected source format: markup changed"
    );
}

#[tokio::test]
async fn parallel_pass_stops_after_cumulative_network_failures() {
    let fakes = fakes(&[Behaviour::Transient; 15]);
    let workers = NonZeroUsize::new(3).unwrap();
    let h = harness(&fakes, config(ExecutionMode::Parallel { workers })).await;

    let report = h.scheduler.run_cycle().await.unwrap();

    let total: usize = fakes.iter().map(runs).sum();
    assert!(report.outage);
    assert!(report.retry.is_none());
    assert!((10..=12).contains(&total), "ran {total} checks");
}

#[tokio::test]
async fn failures_below_the_threshold_are_retried_without_cache() {
    let mut fakes = fakes(&[Behaviour::Report("1"), Behaviour::Transient, Behaviour::Report("2")]);
    for fake in &mut fakes {
        fake.cached = true;
    }
    let workers = NonZeroUsize::new(2).unwrap();
    let h = harness(&fakes, config(ExecutionMode::Parallel { workers })).await;

    let report = h.scheduler.run_cycle().await.unwrap();

    assert!(!report.outage);
    assert_eq!(report.statistics.updated.len(), 2);
    assert_eq!(report.still_failing(), vec!["c01"]);
    assert_eq!(*fakes[1].cache_seen.lock().unwrap(), vec![true, false]);
    assert_eq!(*fakes[0].cache_seen.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn new_version_is_persisted_and_announced_once() {
    let fakes = vec![FakeChecker::new("rom", Behaviour::Report("1.2.3"))];
    let h = harness(&fakes, config(ExecutionMode::Sequential)).await;

    let first = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(first.statistics.updated, vec!["rom"]);

    let saved = h.database.get("rom").await.unwrap().unwrap();
    assert_eq!(saved.info.latest_version(), Some("1.2.3"));
    assert_eq!(saved.info.get(InfoKey::FileSha256), Some("abc123"));

    let delivered = h.notifier.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].destination, "@updates");
    assert!(delivered[0].text.contains("1.2.3"));

    let second = h.scheduler.run_cycle().await.unwrap();
    assert!(second.statistics.updated.is_empty());
    assert_eq!(second.statistics.unchanged, 1);
    assert_eq!(h.notifier.delivered().len(), 1);
    assert_eq!(h.database.get("rom").await.unwrap(), Some(saved));
}

#[tokio::test]
async fn failed_enrichment_still_persists_and_announces() {
    let mut rom = FakeChecker::new("rom", Behaviour::Report("4.0"));
    rom.enrichment_fails = true;
    let h = harness(&[rom], config(ExecutionMode::Sequential)).await;

    let report = h.scheduler.run_cycle().await.unwrap();

    assert_eq!(report.statistics.updated, vec!["rom"]);
    let saved = h.database.get("rom").await.unwrap().unwrap();
    assert_eq!(saved.info.latest_version(), Some("4.0"));
    assert_eq!(saved.info.get(InfoKey::FileSha256), None);
    assert_eq!(h.notifier.delivered().len(), 1);
}

#[tokio::test]
async fn outage_lets_started_checks_finish_their_notification() {
    let good = FakeChecker::new("good", Behaviour::Report("9.9"));
    let mut bad = FakeChecker::new("bad", Behaviour::Transient);
    bad.delay = Duration::from_millis(100);
    let late = FakeChecker::new("late", Behaviour::Report("1.0"));

    let workers = NonZeroUsize::new(2).unwrap();
    let h = harness_with(
        &[good, bad, late.clone()],
        SchedulerConfig {
            cumulative_failure_limit: NonZeroUsize::new(1).unwrap(),
            ..config(ExecutionMode::Parallel { workers })
        },
        ScriptedNotifier::slow(Duration::from_millis(300)),
    )
    .await;

    let report = h.scheduler.run_cycle().await.unwrap();

    assert!(report.outage);
    assert_eq!(report.statistics.updated, vec!["good"]);
    assert_eq!(runs(&late), 0);

    let saved = h.database.get("good").await.unwrap().unwrap();
    assert_eq!(saved.info.latest_version(), Some("9.9"));
    let delivered = h.notifier.delivered();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].text.contains("9.9"));
}

#[tokio::test]
async fn shutdown_during_notification_still_delivers() {
    let h = harness_with(
        &[FakeChecker::new("rom", Behaviour::Report("5.0"))],
        config(ExecutionMode::Sequential),
        ScriptedNotifier::slow(Duration::from_millis(200)),
    )
    .await;

    let scheduler = h.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run_cycle().await });

    let notifier = h.notifier.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while notifier.calls() == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    h.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(CheckerError::Aborted(_))));
    assert!(h.database.get("rom").await.unwrap().is_some());
    assert_eq!(h.notifier.delivered().len(), 1);
}

#[test]
fn bundled_github_sources_fit_the_hourly_quota_at_the_default_interval() {
    let registry = crate::sources::registry().unwrap();
    let entries = registry.active();

    assert!(quota_overruns(&entries, SchedulerConfig::default().interval).is_empty());

    let overruns = quota_overruns(&entries, Duration::from_secs(60));
    assert_eq!(overruns.len(), 1);
    assert_eq!(overruns[0].0.api, "GitHub");
    assert_eq!(overruns[0].1, 180);
}

#[tokio::test]
async fn force_announces_unchanged_versions() {
    let fakes = vec![FakeChecker::new("rom", Behaviour::Report("1.0"))];
    let h = harness(
        &fakes,
        SchedulerConfig {
            force: true,
            ..config(ExecutionMode::Sequential)
        },
    )
    .await;

    h.scheduler.run_cycle().await.unwrap();
    h.scheduler.run_cycle().await.unwrap();

    assert_eq!(h.notifier.delivered().len(), 2);
}

#[tokio::test]
async fn cache_is_cleared_after_every_cycle() {
    let fakes = fakes(&[Behaviour::Report("1")]);
    let h = harness(&fakes, config(ExecutionMode::Sequential)).await;

    h.cache.save(
        CacheKey::new("https://example.org/list", [("page", "1")]),
        "<html></html>".to_owned(),
    );
    assert_eq!(h.cache.len(), 1);

    h.scheduler.run_cycle().await.unwrap();
    assert_eq!(h.cache.len(), 0);
}

#[tokio::test]
async fn prune_keeps_records_of_disabled_checkers() {
    let mut paused = FakeChecker::new("paused", Behaviour::Report("1"));
    paused.disabled = true;
    let fakes = vec![FakeChecker::new("live", Behaviour::Report("1")), paused.clone()];
    let h = harness(&fakes, config(ExecutionMode::Sequential)).await;

    let info = InfoSnapshot::new();
    for id in ["live", "paused", "gone"] {
        h.database.upsert(id, id, &info).await.unwrap();
    }

    let removed = h.scheduler.prune().await.unwrap();
    assert_eq!(removed.into_iter().collect::<Vec<_>>(), vec!["gone"]);
    assert!(h.database.get("paused").await.unwrap().is_some());

    h.scheduler.run_cycle().await.unwrap();
    assert_eq!(runs(&paused), 0);
    assert_eq!(runs(&fakes[0]), 1);
}

#[tokio::test]
async fn check_one_rejects_unknown_identities() {
    let h = harness(&[], config(ExecutionMode::Sequential)).await;

    let err = h.scheduler.check_one("nope").await.unwrap_err();
    assert!(matches!(err, CheckerError::UnknownChecker(id) if id == "nope"));
}

#[tokio::test]
async fn check_one_bypasses_the_cache() {
    let mut fake = FakeChecker::new("rom", Behaviour::Report("3.0"));
    fake.cached = true;
    let h = harness(&[fake.clone()], config(ExecutionMode::Sequential)).await;

    let outcome = h.scheduler.check_one("rom").await.unwrap();

    assert_eq!(outcome, CheckOutcome::Updated);
    assert_eq!(*fake.cache_seen.lock().unwrap(), vec![false]);
}

#[tokio::test]
async fn check_one_surfaces_check_failures() {
    let fake = FakeChecker::new("rom", Behaviour::Permanent);
    let h = harness(&[fake], config(ExecutionMode::Sequential)).await;

    let err = h.scheduler.check_one("rom").await.unwrap_err();
    assert!(matches!(err, CheckerError::Check(CheckError::SourceFormat(_))));
}

#[tokio::test]
async fn requested_shutdown_aborts_before_checking() {
    let fakes = fakes(&[Behaviour::Report("1")]);
    let h = harness(&fakes, config(ExecutionMode::Sequential)).await;
    h.shutdown.cancel();

    let err = h.scheduler.run().await.unwrap_err();

    assert!(matches!(err, CheckerError::Aborted(_)));
    assert_eq!(runs(&fakes[0]), 0);
}

#[tokio::test]
async fn shutdown_interrupts_the_sleep_between_cycles() {
    let fakes = fakes(&[Behaviour::Report("1")]);
    let h = harness(
        &fakes,
        SchedulerConfig {
            interval: Duration::from_secs(3600),
            ..config(ExecutionMode::Sequential)
        },
    )
    .await;

    let scheduler = h.scheduler.clone();
    let handle = tokio::spawn(async move { scheduler.run().await });

    let first = fakes[0].clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while runs(&first) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    h.shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(matches!(result, Err(CheckerError::Aborted(_))));
    assert_eq!(runs(&fakes[0]), 1);
}
