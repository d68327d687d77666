//! Target runner: one scan target from discovery to snapshot.
//!
//! ```text
//! load cache ─▶ list repositories ─▶ filter (forks, date, cap)
//!     ─▶ DelayPlan ─▶ Orchestrator ─▶ IntermediateSnapshot (atomic write)
//! ```
//!
//! Listing is one remote operation under the retry policy. If it fails for
//! good the target aborts with [`TargetError::Discovery`] and the previous
//! snapshot stays on disk untouched.
//!
//! [`run_scan`] drives every configured target in turn. Targets are
//! independent; the only state they share is the global [`ItemBudget`].

use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use codejson_harvester_core::delay::{AdaptiveDelayConfig, DelayConfig, DelayPlan};
use codejson_harvester_core::models::{IntermediateSnapshot, ScanTarget};
use codejson_harvester_core::retry::RetryPolicy;
use codejson_harvester_core::store::SnapshotStore;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::TargetError;
use crate::orchestrator::{DelayCounters, DelayState, ItemBudget, Orchestrator};
use crate::progress::{format_number, ScanProgressEvent, ScanProgressReporter};
use crate::remote::{ListRepositories, Paced, RemoteCall, Retrying};
use crate::traits::{Analyzer, Connector, ConnectorRegistry};

/// Result of one successful target run.
#[derive(Debug, Clone)]
pub struct TargetReport {
    pub target: ScanTarget,
    pub scan_id: String,
    /// Repositories returned by the connector.
    pub discovered: usize,
    /// Dropped by the fork, date and per-target cap filters.
    pub filtered_out: usize,
    pub dispatched: usize,
    /// Left out because the global cap ran out.
    pub omitted: usize,
    pub plan: DelayPlan,
    pub counters: DelayCounters,
}

/// Everything needed to run targets of one platform.
pub struct TargetRunner {
    pub connector: Arc<dyn Connector>,
    pub analyzer: Option<Arc<dyn Analyzer>>,
    pub cache: CacheStore,
    pub delay: DelayConfig,
    pub adaptive: AdaptiveDelayConfig,
    pub retry: RetryPolicy,
    pub workers: usize,
    pub skip_forks: bool,
    pub budget: Option<ItemBudget>,
    pub progress: Arc<dyn ScanProgressReporter>,
}

impl TargetRunner {
    pub async fn run(&self, target: &ScanTarget) -> Result<TargetReport, TargetError> {
        let label = target.label();
        self.progress.report(ScanProgressEvent::Discovering {
            target: label.clone(),
        });

        let cache = self.cache.load(target).await;

        let listed = Retrying::new(
            Paced::new(
                ListRepositories {
                    connector: self.connector.as_ref(),
                    target,
                },
                self.delay.per_call(None),
            ),
            self.retry.clone(),
            format!("list {}", label),
        )
        .call()
        .await
        .map_err(|e| {
            tracing::error!(scan = %label, error = %e, "discovery failed, keeping previous snapshot");
            TargetError::Discovery(e)
        })?;

        let listed_count = listed.len();
        let mut seen = HashSet::new();
        let listed: Vec<_> = listed
            .into_iter()
            .filter(|r| seen.insert(r.identity.clone()))
            .collect();
        let discovered = listed.len();
        if discovered < listed_count {
            tracing::warn!(
                scan = %label,
                dropped = listed_count - discovered,
                "listing returned duplicate repositories, keeping first occurrence"
            );
        }

        let mut repos: Vec<_> = listed
            .into_iter()
            .filter(|r| !(self.skip_forks && r.is_fork))
            .filter(|r| r.passes_date_filter(target.created_after))
            .collect();
        if let Some(cap) = target.item_cap {
            repos.truncate(cap);
        }
        let filtered_out = discovered - repos.len();

        let recent = target
            .created_after
            .map(|date| repos.iter().filter(|r| r.touched_since(date)).count());
        let plan = DelayPlan::compute(&self.delay, &self.adaptive, repos.len(), recent);
        tracing::info!(
            scan = %label,
            discovered,
            selected = repos.len(),
            cached = cache.len(),
            effective = plan.effective_count,
            per_call_secs = plan.per_call.as_secs_f64(),
            inter_item_secs = plan.inter_item.as_secs_f64(),
            "starting target"
        );

        let state = Arc::new(DelayState::new(repos.len()));
        let output = Orchestrator {
            target: target.clone(),
            connector: self.connector.clone(),
            analyzer: self.analyzer.clone(),
            cache,
            plan,
            retry: self.retry.clone(),
            workers: self.workers,
            state: state.clone(),
            budget: self.budget.clone(),
            progress: self.progress.clone(),
        }
        .run(repos)
        .await;

        let scan_id = Uuid::new_v4().to_string();
        let snapshot =
            IntermediateSnapshot::new(target.clone(), scan_id.clone(), Utc::now(), output.records);
        self.cache
            .save(&snapshot)
            .await
            .map_err(TargetError::Snapshot)?;

        let counters = state.counters();
        tracing::info!(
            scan = %label,
            hits = counters.cache_hits,
            misses = counters.cache_misses,
            degraded = counters.degraded,
            omitted = output.omitted,
            delay_applied_secs = counters.inter_item_total.as_secs_f64(),
            "target finished"
        );
        self.progress.report(ScanProgressEvent::Finished {
            target: label,
            hits: counters.cache_hits as u64,
            misses: counters.cache_misses as u64,
            degraded: counters.degraded as u64,
        });

        Ok(TargetReport {
            target: target.clone(),
            scan_id,
            discovered,
            filtered_out,
            dispatched: output.dispatched,
            omitted: output.omitted,
            plan,
            counters,
        })
    }
}

/// CLI-level overrides applied on top of the config file.
#[derive(Debug, Clone, Default)]
pub struct ScanOverrides {
    pub workers: Option<usize>,
    /// Global item cap across all targets.
    pub limit: Option<usize>,
    /// Only run targets whose `platform:name` label is listed.
    pub targets: Vec<String>,
}

/// Outcome of a whole scan.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub reports: Vec<TargetReport>,
    pub failures: Vec<(ScanTarget, TargetError)>,
}

impl ScanSummary {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Run every selected target sequentially.
///
/// A target that aborts is recorded in [`ScanSummary::failures`] and the
/// scan moves on. The returned error covers only setup problems such as a
/// `--target` filter that matches nothing.
pub async fn run_scan(
    config: &Config,
    registry: &ConnectorRegistry,
    analyzer: Option<Arc<dyn Analyzer>>,
    store: Arc<dyn SnapshotStore>,
    overrides: &ScanOverrides,
    progress: Arc<dyn ScanProgressReporter>,
) -> Result<ScanSummary> {
    let mut targets = config.scan_targets();
    if !overrides.targets.is_empty() {
        let unknown: Vec<&String> = overrides
            .targets
            .iter()
            .filter(|want| !targets.iter().any(|t| t.label() == **want))
            .collect();
        if !unknown.is_empty() {
            bail!(
                "Unknown target(s): {}. Configured: {}",
                unknown
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                targets
                    .iter()
                    .map(|t| t.label())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        targets.retain(|t| overrides.targets.contains(&t.label()));
    }

    let cap = overrides.limit.or(config.harvest.item_cap);
    let budget = cap.map(ItemBudget::new);
    let cache = CacheStore::new(store);
    let workers = overrides.workers.unwrap_or(config.harvest.workers);
    let retry = RetryPolicy::new(config.retry.clone());

    let mut summary = ScanSummary::default();
    for target in targets {
        if budget.as_ref().map(|b| b.is_exhausted()).unwrap_or(false) {
            tracing::info!(scan = %target.label(), "global item cap exhausted, skipping target");
            continue;
        }
        let Some(connector) = registry.find(target.platform) else {
            let err = TargetError::NoConnector(target.platform.to_string());
            tracing::error!(scan = %target.label(), error = %err, "target aborted");
            summary.failures.push((target, err));
            continue;
        };

        let runner = TargetRunner {
            connector,
            analyzer: analyzer.clone(),
            cache: cache.clone(),
            delay: config.delay.clone(),
            adaptive: config.adaptive_delay.clone(),
            retry: retry.clone(),
            workers,
            skip_forks: config.harvest.skip_forks,
            budget: budget.clone(),
            progress: progress.clone(),
        };
        match runner.run(&target).await {
            Ok(report) => summary.reports.push(report),
            Err(err) => {
                tracing::error!(scan = %target.label(), error = %err, "target aborted");
                summary.failures.push((target, err));
            }
        }
    }
    Ok(summary)
}

/// Print a scan summary on stdout.
pub fn print_summary(summary: &ScanSummary) {
    for report in &summary.reports {
        let c = &report.counters;
        println!("scan {}", report.target.label());
        println!("  discovered: {}", format_number(report.discovered as u64));
        println!("  filtered out: {}", format_number(report.filtered_out as u64));
        println!("  processed: {}", format_number(report.dispatched as u64));
        if report.omitted > 0 {
            println!("  omitted (global cap): {}", format_number(report.omitted as u64));
        }
        println!("  cache hits: {}", format_number(c.cache_hits as u64));
        println!("  cache misses: {}", format_number(c.cache_misses as u64));
        println!("  degraded: {}", format_number(c.degraded as u64));
        println!(
            "  delay: {:.3}s per call, {:.3}s between items ({:.1}s applied)",
            report.plan.per_call.as_secs_f64(),
            report.plan.inter_item.as_secs_f64(),
            c.inter_item_total.as_secs_f64()
        );
        println!("  scan id: {}", report.scan_id);
    }
    for (target, err) in &summary.failures {
        println!("scan {}", target.label());
        println!("  aborted: {}", err);
    }
    if summary.has_failures() {
        println!("{} target(s) aborted", summary.failures.len());
    } else {
        println!("ok");
    }
}
