//! Bounded-concurrency processing of one target's repositories.
//!
//! # Per-repository task
//!
//! ```text
//!  acquire worker slot ──▶ freshness check ─┬─ Fresh ──▶ reuse cached record
//!                                           └─ Stale ──▶ fetch detail ─▶ analyze
//!                                                          (Paced + Retrying)
//!            ┌──────────────────────────────────────────────────┘
//!            ▼
//!  inter-item delay ──▶ update DelayState ──▶ release worker slot
//! ```
//!
//! At most `workers` tasks hold a slot at any instant. The slot is an
//! [`OwnedSemaphorePermit`] moved into the task, so it is released even if
//! the task panics.
//!
//! The output holds exactly one record per dispatched repository. A
//! repository that fails after retries, or whose task panics, becomes a
//! degraded record. Siblings are never cancelled.

use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use codejson_harvester_core::delay::DelayPlan;
use codejson_harvester_core::freshness::{CacheIndex, Freshness};
use codejson_harvester_core::models::{RepositoryRecord, RepositorySummary, ScanTarget};
use codejson_harvester_core::retry::RetryPolicy;

use crate::error::RemoteError;
use crate::progress::{ScanProgressEvent, ScanProgressReporter};
use crate::remote::{AnalysisStep, Analyze, FetchDetail, Paced, RemoteCall, Retrying};
use crate::traits::{Analyzer, Connector};

/// How one repository was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    CacheHit,
    CacheMiss,
    Degraded,
}

/// Counters kept for one target run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelayCounters {
    pub processed: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub degraded: usize,
    pub inter_item_total: Duration,
}

/// Per-target delay state.
///
/// Owned by the target runner and handed to the orchestrator behind an
/// `Arc`. The mutex guards only the counter update; no remote call is made
/// while it is held.
#[derive(Debug)]
pub struct DelayState {
    discovered: usize,
    counters: Mutex<DelayCounters>,
}

impl DelayState {
    pub fn new(discovered: usize) -> Self {
        Self {
            discovered,
            counters: Mutex::new(DelayCounters::default()),
        }
    }

    pub fn discovered(&self) -> usize {
        self.discovered
    }

    /// Record a finished repository and return the processed count.
    pub fn record(&self, outcome: Outcome, inter_item: Duration) -> usize {
        let mut c = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        c.processed += 1;
        c.inter_item_total += inter_item;
        match outcome {
            Outcome::CacheHit => c.cache_hits += 1,
            Outcome::CacheMiss => c.cache_misses += 1,
            Outcome::Degraded => c.degraded += 1,
        }
        c.processed
    }

    pub fn counters(&self) -> DelayCounters {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Global cap on repositories dispatched in one invocation.
///
/// Shared by every target; the only cross-target state.
#[derive(Debug, Clone)]
pub struct ItemBudget {
    remaining: Arc<AtomicUsize>,
}

impl ItemBudget {
    pub fn new(cap: usize) -> Self {
        Self {
            remaining: Arc::new(AtomicUsize::new(cap)),
        }
    }

    /// Take one unit. Returns false once the budget is exhausted.
    pub fn try_take(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| r.checked_sub(1))
            .is_ok()
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Everything a repository task needs, shared across tasks.
pub struct Orchestrator {
    pub target: ScanTarget,
    pub connector: Arc<dyn Connector>,
    pub analyzer: Option<Arc<dyn Analyzer>>,
    pub cache: CacheIndex,
    pub plan: DelayPlan,
    pub retry: RetryPolicy,
    pub workers: usize,
    pub state: Arc<DelayState>,
    pub budget: Option<ItemBudget>,
    pub progress: Arc<dyn ScanProgressReporter>,
}

#[derive(Debug, Default)]
pub struct OrchestratorOutput {
    /// One record per dispatched repository, in dispatch order.
    pub records: Vec<RepositoryRecord>,
    pub dispatched: usize,
    /// Repositories never dispatched because the global cap was reached.
    pub omitted: usize,
}

impl Orchestrator {
    /// Process `repos` with at most `workers` tasks in flight.
    pub async fn run(self, repos: Vec<RepositorySummary>) -> OrchestratorOutput {
        let total = repos.len();
        let shared = Arc::new(self);
        let slots = Arc::new(Semaphore::new(shared.workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending: Vec<(RepositorySummary, Option<RepositoryRecord>)> = Vec::new();

        for summary in repos {
            let permit = match slots.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            if let Some(budget) = &shared.budget {
                if !budget.try_take() {
                    tracing::info!(
                        scan = %shared.target.label(),
                        dispatched = pending.len(),
                        "global item cap reached, stopping dispatch"
                    );
                    break;
                }
            }

            let index = pending.len();
            pending.push((summary.clone(), None));
            let task_shared = shared.clone();
            tasks.spawn(async move {
                let record = task_shared.process(summary, total, permit).await;
                (index, record)
            });

            // collect whatever already finished so memory stays flat
            while let Some(joined) = tasks.try_join_next() {
                absorb(&mut pending, joined);
            }
        }

        while let Some(joined) = tasks.join_next().await {
            absorb(&mut pending, joined);
        }

        let dispatched = pending.len();
        let mut records = Vec::with_capacity(dispatched);
        for (summary, record) in pending {
            match record {
                Some(r) => records.push(r),
                None => {
                    tracing::error!(
                        scan = %shared.target.label(),
                        repo = %summary.identity,
                        "repository task did not complete"
                    );
                    shared.state.record(Outcome::Degraded, Duration::ZERO);
                    records.push(RepositoryRecord::degraded(
                        &summary,
                        &shared.target.name,
                        "processing task panicked",
                        Utc::now(),
                    ));
                }
            }
        }

        OrchestratorOutput {
            records,
            dispatched,
            omitted: total - dispatched,
        }
    }

    async fn process(
        &self,
        summary: RepositorySummary,
        total: usize,
        permit: OwnedSemaphorePermit,
    ) -> RepositoryRecord {
        let (record, outcome) = match self.cache.check(&summary) {
            Freshness::Fresh(record) => {
                tracing::debug!(repo = %summary.identity, "cache hit");
                (record, Outcome::CacheHit)
            }
            Freshness::Stale(reason) => {
                tracing::debug!(repo = %summary.identity, reason = reason.as_str(), "cache miss");
                match self.fetch_fresh(&summary).await {
                    Ok(record) => (record, Outcome::CacheMiss),
                    Err(err) => {
                        tracing::warn!(
                            scan = %self.target.label(),
                            repo = %summary.identity,
                            name = %summary.name,
                            error = %err,
                            "repository failed, emitting degraded record"
                        );
                        let record = RepositoryRecord::degraded(
                            &summary,
                            &self.target.name,
                            err.to_string(),
                            Utc::now(),
                        );
                        (record, Outcome::Degraded)
                    }
                }
            }
        };

        let pause = self.plan.inter_item;
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        let n = self.state.record(outcome, pause);
        self.progress.report(ScanProgressEvent::Processing {
            target: self.target.label(),
            n: n as u64,
            total: total as u64,
        });
        drop(permit);
        record
    }

    async fn fetch_fresh(&self, summary: &RepositorySummary) -> Result<RepositoryRecord, RemoteError> {
        let harvested_at = Utc::now();
        let detail = self
            .guarded(
                FetchDetail {
                    connector: self.connector.as_ref(),
                    summary,
                },
                format!("detail {}", summary.identity),
            )
            .await?;

        let mut extra: Vec<Map<String, Value>> = Vec::new();
        if let Some(analyzer) = &self.analyzer {
            for step in [AnalysisStep::ClassifyExemption, AnalysisStep::InferOrganization] {
                let fields = self
                    .guarded(
                        Analyze {
                            analyzer: analyzer.as_ref(),
                            step,
                            summary,
                            detail: &detail,
                        },
                        format!("{:?} {}", step, summary.identity),
                    )
                    .await?;
                extra.push(fields);
            }
        }

        let mut record =
            RepositoryRecord::from_detail(summary, &self.target.name, detail, harvested_at);
        for fields in extra {
            record.analysis.extend(fields);
        }
        Ok(record)
    }

    /// Wrap a collaborator call in the per-call delay and the retry policy.
    async fn guarded<C: RemoteCall>(
        &self,
        call: C,
        label: String,
    ) -> Result<C::Output, RemoteError> {
        Retrying::new(Paced::new(call, self.plan.per_call), self.retry.clone(), label)
            .call()
            .await
    }
}

fn absorb(
    pending: &mut [(RepositorySummary, Option<RepositoryRecord>)],
    joined: Result<(usize, RepositoryRecord), tokio::task::JoinError>,
) {
    match joined {
        Ok((index, record)) => {
            if let Some(slot) = pending.get_mut(index) {
                slot.1 = Some(record);
            }
        }
        Err(e) => tracing::error!(error = %e, "repository task failed to join"),
    }
}
