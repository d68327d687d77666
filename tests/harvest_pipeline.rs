//! End-to-end tests of the harvesting pipeline with scripted connectors.
//!
//! Every test runs on a paused tokio clock, so retry backoff and pacing
//! sleeps complete instantly while still being ordered and measurable.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use codejson_harvester::analyzer::RuleAnalyzer;
use codejson_harvester::cache::{CacheStore, FileSnapshotStore};
use codejson_harvester::config::{AnalysisConfig, Config, OutputConfig};
use codejson_harvester::error::{RemoteError, TargetError};
use codejson_harvester::merge::run_merge;
use codejson_harvester::orchestrator::ItemBudget;
use codejson_harvester::progress::NoProgress;
use codejson_harvester::runner::{run_scan, ScanOverrides, TargetRunner};
use codejson_harvester::traits::{Analyzer, Connector, ConnectorRegistry};
use codejson_harvester_core::delay::{AdaptiveDelayConfig, DelayConfig};
use codejson_harvester_core::models::{
    IntermediateSnapshot, Platform, RepositoryDetail, RepositoryIdentity, RepositorySummary,
    ScanTarget, Visibility,
};
use codejson_harvester_core::retry::{RetryConfig, RetryPolicy};
use codejson_harvester_core::store::memory::InMemorySnapshotStore;
use codejson_harvester_core::store::SnapshotStore;

// ─── Scripted connector ─────────────────────────────────────────────

struct ScriptedConnector {
    platform: Platform,
    repos: Mutex<Vec<RepositorySummary>>,
    list_error: Mutex<Option<RemoteError>>,
    detail_errors: Mutex<HashMap<String, RemoteError>>,
    detail_latency: Duration,
    list_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedConnector {
    fn new(platform: Platform, repos: Vec<RepositorySummary>) -> Self {
        Self {
            platform,
            repos: Mutex::new(repos),
            list_error: Mutex::new(None),
            detail_errors: Mutex::new(HashMap::new()),
            detail_latency: Duration::from_millis(500),
            list_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    fn fail_listing(&self, err: RemoteError) {
        *self.list_error.lock().unwrap() = Some(err);
    }

    fn fail_detail(&self, repo_id: &str, err: RemoteError) {
        self.detail_errors
            .lock()
            .unwrap()
            .insert(repo_id.to_string(), err);
    }

    fn set_sha(&self, repo_id: &str, sha: &str) {
        let mut repos = self.repos.lock().unwrap();
        for r in repos.iter_mut() {
            if r.identity.repo_id == repo_id {
                r.last_commit_sha = Some(sha.to_string());
            }
        }
    }

    fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    fn name(&self) -> &str {
        "scripted"
    }

    fn description(&self) -> &str {
        "Scripted test connector"
    }

    fn platform(&self) -> Platform {
        self.platform
    }

    async fn list_repositories(
        &self,
        _target: &ScanTarget,
    ) -> Result<Vec<RepositorySummary>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.list_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.repos.lock().unwrap().clone())
    }

    async fn fetch_full_detail(
        &self,
        summary: &RepositorySummary,
    ) -> Result<RepositoryDetail, RemoteError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.detail_latency).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self
            .detail_errors
            .lock()
            .unwrap()
            .get(&summary.identity.repo_id)
            .cloned();
        if let Some(err) = scripted {
            return Err(err);
        }
        Ok(RepositoryDetail {
            // not exactly representable; must survive the cache round trip
            labor_hours: 0.1 + 0.2 + summary.identity.repo_id.len() as f64,
            fields: json!({
                "readme_content": format!("# {}\nHandles patient data.", summary.name),
                "contact": { "emails": ["Owner@cdc.gov"] },
            })
            .as_object()
            .cloned()
            .unwrap(),
        })
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn summary(platform: Platform, id: &str, sha: &str, visibility: Visibility) -> RepositorySummary {
    RepositorySummary {
        identity: RepositoryIdentity::new(platform, id),
        name: format!("repo-{}", id),
        last_commit_sha: Some(sha.to_string()),
        is_empty: false,
        is_fork: false,
        visibility,
        created_at: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
        pushed_at: None,
    }
}

fn repos(n: usize) -> Vec<RepositorySummary> {
    (1..=n)
        .map(|i| summary(Platform::Github, &i.to_string(), "sha-1", Visibility::Public))
        .collect()
}

fn no_delay() -> DelayConfig {
    DelayConfig {
        base_secs: 0.0,
        max_secs: 0.0,
        ..DelayConfig::default()
    }
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy::new(RetryConfig {
        max_retries: 2,
        initial_delay_secs: 1.0,
        backoff_factor: 2.0,
        max_delay_secs: 10.0,
        jitter: 0.0,
    })
}

fn runner(connector: Arc<ScriptedConnector>, store: Arc<dyn SnapshotStore>, workers: usize) -> TargetRunner {
    TargetRunner {
        connector,
        analyzer: None,
        cache: CacheStore::new(store),
        delay: no_delay(),
        adaptive: AdaptiveDelayConfig::default(),
        retry: quick_retry(),
        workers,
        skip_forks: true,
        budget: None,
        progress: Arc::new(NoProgress),
    }
}

fn target() -> ScanTarget {
    ScanTarget::new(Platform::Github, "CDCgov")
}

async fn snapshot(store: &dyn SnapshotStore, target: &ScanTarget) -> IntermediateSnapshot {
    store.read(target).await.unwrap().expect("snapshot written")
}

// ─── Cache reuse and invalidation ───────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unchanged_repositories_are_reused_byte_for_byte() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, repos(12)));
    let run = runner(connector.clone(), store.clone(), 3);

    let first = run.run(&target()).await.unwrap();
    assert_eq!(first.counters.cache_misses, 12);
    assert_eq!(connector.detail_calls(), 12);
    let before = snapshot(store.as_ref(), &target()).await;

    let second = run.run(&target()).await.unwrap();
    assert_eq!(second.counters.cache_hits, 12);
    assert_eq!(second.counters.cache_misses, 0);
    assert_eq!(connector.detail_calls(), 12, "no detail fetch on a cache hit");

    let after = snapshot(store.as_ref(), &target()).await;
    assert_ne!(before.scan_id, after.scan_id);
    assert_eq!(
        serde_json::to_string(&before.records).unwrap(),
        serde_json::to_string(&after.records).unwrap()
    );
}

#[tokio::test(start_paused = true)]
async fn changed_commit_or_emptiness_invalidates_only_that_repository() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, repos(5)));
    let run = runner(connector.clone(), store.clone(), 2);
    run.run(&target()).await.unwrap();
    let before = snapshot(store.as_ref(), &target()).await;

    connector.set_sha("2", "sha-2");
    {
        let mut listed = connector.repos.lock().unwrap();
        listed[3].is_empty = true;
    }

    let report = run.run(&target()).await.unwrap();
    assert_eq!(report.counters.cache_misses, 2);
    assert_eq!(report.counters.cache_hits, 3);
    assert_eq!(connector.detail_calls(), 7);

    let after = snapshot(store.as_ref(), &target()).await;
    let changed = after
        .records
        .iter()
        .find(|r| r.identity.repo_id == "2")
        .unwrap();
    assert_eq!(changed.last_commit_sha.as_deref(), Some("sha-2"));
    let untouched = |s: &IntermediateSnapshot| {
        s.records
            .iter()
            .find(|r| r.identity.repo_id == "1")
            .cloned()
            .unwrap()
    };
    assert_eq!(untouched(&before), untouched(&after));
}

#[tokio::test(start_paused = true)]
async fn corrupt_cache_is_a_cold_start() {
    let store = Arc::new(InMemorySnapshotStore::new());
    store.put_raw(&target(), "{\"records\": [").unwrap();
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, repos(4)));

    let report = runner(connector.clone(), store.clone(), 2)
        .run(&target())
        .await
        .unwrap();
    assert_eq!(report.counters.cache_misses, 4);
    assert_eq!(snapshot(store.as_ref(), &target()).await.records.len(), 4);
}

// ─── Concurrency ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn in_flight_tasks_never_exceed_worker_limit() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, repos(20)));

    let report = runner(connector.clone(), store.clone(), 4)
        .run(&target())
        .await
        .unwrap();

    assert_eq!(report.dispatched, 20);
    assert_eq!(connector.max_in_flight.load(Ordering::SeqCst), 4);
    let snap = snapshot(store.as_ref(), &target()).await;
    assert_eq!(snap.records.len(), 20);
    let mut ids: Vec<_> = snap.records.iter().map(|r| r.identity.clone()).collect();
    ids.dedup();
    assert_eq!(ids.len(), 20, "exactly one record per repository");
}

#[tokio::test(start_paused = true)]
async fn repeated_listing_entries_are_processed_once() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let mut listed = repos(3);
    listed.push(listed[0].clone());
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, listed));

    let report = runner(connector.clone(), store.clone(), 2)
        .run(&target())
        .await
        .unwrap();

    assert_eq!(report.discovered, 3);
    assert_eq!(report.dispatched, 3);
    assert_eq!(connector.detail_calls(), 3);
    let snap = snapshot(store.as_ref(), &target()).await;
    let ids: Vec<_> = snap.records.iter().map(|r| r.identity.repo_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[tokio::test(start_paused = true)]
async fn adaptive_pause_is_applied_after_every_repository() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, repos(120)));
    let mut run = runner(connector.clone(), store.clone(), 4);
    run.adaptive = AdaptiveDelayConfig {
        enabled: true,
        base_secs: 0.1,
        threshold: 50,
        max_secs: 1.0,
        modified_weight: 0.1,
    };

    let report = run.run(&target()).await.unwrap();
    let pause = report.plan.inter_item.as_secs_f64();
    assert!(pause > 0.1 && pause <= 1.0, "pause {}", pause);
    let applied = report.counters.inter_item_total.as_secs_f64();
    assert!((applied - pause * 120.0).abs() < 1e-6);

    connector.repos.lock().unwrap().truncate(10);
    let small = run.run(&target()).await.unwrap();
    assert!(small.plan.inter_item.is_zero());
}

// ─── Failure handling ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failing_repository_becomes_degraded_without_stopping_siblings() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, repos(6)));
    connector.fail_detail("3", RemoteError::Transient("HTTP 502".into()));
    connector.fail_detail("5", RemoteError::NotFound("gone".into()));

    let report = runner(connector.clone(), store.clone(), 2)
        .run(&target())
        .await
        .unwrap();

    assert_eq!(report.counters.degraded, 2);
    assert_eq!(report.counters.cache_misses, 4);
    // 3 tries for the transient failure, 1 for not-found, 4 healthy
    assert_eq!(connector.detail_calls(), 3 + 1 + 4);

    let snap = snapshot(store.as_ref(), &target()).await;
    assert_eq!(snap.records.len(), 6);
    let degraded: Vec<_> = snap
        .records
        .iter()
        .filter(|r| r.is_degraded())
        .map(|r| r.identity.repo_id.as_str())
        .collect();
    assert_eq!(degraded, vec!["3", "5"]);

    // degraded records are retried on the next run
    let again = runner(connector.clone(), store.clone(), 2)
        .run(&target())
        .await
        .unwrap();
    assert_eq!(again.counters.cache_hits, 4);
}

#[tokio::test(start_paused = true)]
async fn discovery_failure_keeps_previous_snapshot() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, repos(3)));
    let run = runner(connector.clone(), store.clone(), 2);
    run.run(&target()).await.unwrap();
    let raw_before = store.raw(&target());
    let writes_before = store.writes();

    connector.fail_listing(RemoteError::Unauthorized("HTTP 401".into()));
    let err = run.run(&target()).await.unwrap_err();
    assert!(matches!(err, TargetError::Discovery(RemoteError::Unauthorized(_))));
    assert_eq!(connector.list_calls.load(Ordering::SeqCst), 2, "auth errors are not retried");

    connector.fail_listing(RemoteError::RateLimited { retry_after: None });
    let err = run.run(&target()).await.unwrap_err();
    assert!(matches!(err, TargetError::Discovery(RemoteError::RateLimited { .. })));
    assert_eq!(connector.list_calls.load(Ordering::SeqCst), 2 + 3);

    assert_eq!(store.raw(&target()), raw_before);
    assert_eq!(store.writes(), writes_before);
}

// ─── Caps ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn global_cap_omits_undispatched_repositories() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, repos(20)));
    let mut run = runner(connector.clone(), store.clone(), 3);
    let budget = ItemBudget::new(5);
    run.budget = Some(budget.clone());

    let report = run.run(&target()).await.unwrap();
    assert_eq!(report.dispatched, 5);
    assert_eq!(report.omitted, 15);
    assert!(budget.is_exhausted());
    assert_eq!(snapshot(store.as_ref(), &target()).await.records.len(), 5);
}

#[tokio::test(start_paused = true)]
async fn forks_date_filter_and_target_cap() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let mut listed = repos(6);
    listed[0].is_fork = true;
    listed[1].visibility = Visibility::Private; // created 2024-06-01, before the filter
    listed[2].visibility = Visibility::Private;
    listed[2].pushed_at = Some(Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap());
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, listed));

    let mut t = target();
    t.created_after = Some(chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
    t.item_cap = Some(3);

    let report = runner(connector.clone(), store.clone(), 2)
        .run(&t)
        .await
        .unwrap();
    assert_eq!(report.discovered, 6);
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.filtered_out, 3);
    let ids: Vec<String> = snapshot(store.as_ref(), &t)
        .await
        .records
        .into_iter()
        .map(|r| r.identity.repo_id)
        .collect();
    assert_eq!(ids, vec!["3", "4", "5"]);
}

// ─── Whole scan + merge ─────────────────────────────────────────────

const CONFIG: &str = r#"
[output]
dir = "OUT"

[harvest]
workers = 3

[delay]
base_secs = 0.0
max_secs = 0.0

[retry]
max_retries = 1
initial_delay_secs = 1.0

[[targets]]
platform = "github"
name = "CDCgov"

[[targets]]
platform = "github"
name = "cdcent"

[[targets]]
platform = "gitlab"
name = "cdc/ncird"

[connectors.github]
kind = "manifest"
root = "unused"
"#;

fn config(dir: &std::path::Path) -> Config {
    toml::from_str(&CONFIG.replace("OUT", &dir.display().to_string())).unwrap()
}

fn analyzer() -> Option<Arc<dyn Analyzer>> {
    Some(Arc::new(RuleAnalyzer::new(&AnalysisConfig {
        enabled: true,
        sensitive_keywords: vec!["patient data".to_string()],
        organizations: Default::default(),
    })))
}

#[tokio::test(start_paused = true)]
async fn scan_then_merge_is_deduplicated_and_idempotent() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(tmp.path());
    let store = Arc::new(FileSnapshotStore::new(tmp.path()));

    // both github targets list repository 2
    let github = Arc::new(ScriptedConnector::new(
        Platform::Github,
        vec![
            summary(Platform::Github, "1", "a", Visibility::Public),
            summary(Platform::Github, "2", "b", Visibility::Private),
            summary(Platform::Github, "3", "c", Visibility::Internal),
        ],
    ));
    let mut registry = ConnectorRegistry::new();
    registry.register(github.clone());

    let summary = run_scan(
        &cfg,
        &registry,
        analyzer(),
        store.clone(),
        &ScanOverrides::default(),
        Arc::new(NoProgress),
    )
    .await
    .unwrap();
    assert_eq!(summary.reports.len(), 2);
    assert_eq!(summary.failures.len(), 1, "gitlab has no connector");
    assert!(matches!(summary.failures[0].1, TargetError::NoConnector(_)));

    let output: OutputConfig = cfg.output.clone();
    let first = run_merge(&output, store.as_ref()).await.unwrap();
    assert_eq!(first.releases, 3);
    assert_eq!(first.conflicts_dropped, 3);
    let catalog_one = std::fs::read(output.catalog_path()).unwrap();

    let second = run_merge(&output, store.as_ref()).await.unwrap();
    assert_eq!(second.new_private_ids, 0);
    assert_eq!(second.new_exemptions, 0);
    assert_eq!(second.backups.len(), 2);
    let catalog_two = std::fs::read(output.catalog_path()).unwrap();
    assert_eq!(catalog_one, catalog_two);

    let catalog: serde_json::Value = serde_json::from_slice(&catalog_one).unwrap();
    let releases = catalog["releases"].as_array().unwrap();
    assert_eq!(releases.len(), 3);
    assert_eq!(releases[1]["privateID"], "github_2");
    assert_eq!(releases[1]["permissions"]["usageType"], "exemptByLaw");
    assert!(releases[0].get("privateID").is_none());
    assert_eq!(catalog["measurementType"]["method"], "projects");

    let map: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output.private_id_map_path()).unwrap())
            .unwrap();
    assert_eq!(map["github_2"]["contactEmails"][0], "owner@cdc.gov");
    let log: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output.exemption_log_path()).unwrap())
            .unwrap();
    assert_eq!(log.as_array().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn global_limit_is_shared_across_targets() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(tmp.path());
    let store = Arc::new(InMemorySnapshotStore::new());
    let github = Arc::new(ScriptedConnector::new(Platform::Github, repos(4)));
    let mut registry = ConnectorRegistry::new();
    registry.register(github.clone());

    let overrides = ScanOverrides {
        limit: Some(6),
        targets: vec!["github:CDCgov".into(), "github:cdcent".into()],
        ..ScanOverrides::default()
    };
    let summary = run_scan(&cfg, &registry, None, store.clone(), &overrides, Arc::new(NoProgress))
        .await
        .unwrap();
    assert!(!summary.has_failures());
    let dispatched: Vec<usize> = summary.reports.iter().map(|r| r.dispatched).collect();
    assert_eq!(dispatched, vec![4, 2]);
    assert_eq!(summary.reports[1].omitted, 2);
}

#[tokio::test(start_paused = true)]
async fn unknown_target_filter_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(tmp.path());
    let overrides = ScanOverrides {
        targets: vec!["github:nope".into()],
        ..ScanOverrides::default()
    };
    let err = run_scan(
        &cfg,
        &ConnectorRegistry::new(),
        None,
        Arc::new(InMemorySnapshotStore::new()),
        &overrides,
        Arc::new(NoProgress),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("github:nope"));
}

#[tokio::test(start_paused = true)]
async fn targets_sharing_a_slug_keep_separate_snapshots() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(FileSnapshotStore::new(tmp.path()));
    let group = ScanTarget::new(Platform::Gitlab, "cdc/ncird");
    let flat = ScanTarget::new(Platform::Gitlab, "cdc_ncird");

    let group_repos: Vec<_> = (1..=3)
        .map(|i| summary(Platform::Gitlab, &i.to_string(), "a", Visibility::Private))
        .collect();
    let flat_repos: Vec<_> = (10..=11)
        .map(|i| summary(Platform::Gitlab, &i.to_string(), "b", Visibility::Private))
        .collect();
    let group_conn = Arc::new(ScriptedConnector::new(Platform::Gitlab, group_repos));
    let flat_conn = Arc::new(ScriptedConnector::new(Platform::Gitlab, flat_repos));

    runner(group_conn.clone(), store.clone(), 2).run(&group).await.unwrap();
    let flat_report = runner(flat_conn.clone(), store.clone(), 2)
        .run(&flat)
        .await
        .unwrap();
    assert_eq!(flat_report.counters.cache_hits, 0);

    let all = store.read_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.iter().map(|s| s.records.len()).sum::<usize>(), 5);

    let again = runner(group_conn.clone(), store.clone(), 2)
        .run(&group)
        .await
        .unwrap();
    assert_eq!(again.counters.cache_hits, 3);
    assert_eq!(group_conn.detail_calls(), 3);
}

// ─── Crash safety ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn interrupted_write_leaves_previous_snapshot_readable() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(FileSnapshotStore::new(tmp.path()));
    let connector = Arc::new(ScriptedConnector::new(Platform::Github, repos(3)));
    runner(connector.clone(), store.clone(), 2)
        .run(&target())
        .await
        .unwrap();
    let committed = std::fs::read(store.path_for(&target())).unwrap();

    // a writer killed before the rename leaves only its temp file behind
    let mut partial = tempfile::NamedTempFile::new_in(tmp.path()).unwrap();
    std::io::Write::write_all(&mut partial, &committed[..committed.len() / 2]).unwrap();
    let (_file, _kept) = partial.keep().unwrap();

    assert_eq!(std::fs::read(store.path_for(&target())).unwrap(), committed);
    let cache = CacheStore::new(store.clone());
    assert_eq!(cache.load(&target()).await.len(), 3);
    assert_eq!(store.read_all().await.unwrap().len(), 1);
}
