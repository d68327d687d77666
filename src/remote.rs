//! Remote-call abstraction and its pacing and retry decorators.
//!
//! Every outbound collaborator call (listing, detail fetch, analysis) is
//! expressed as a [`RemoteCall`]. Pacing and retry are layered on top as
//! decorators instead of sleeping at call sites:
//!
//! ```text
//! Retrying ──▶ Paced ──▶ FetchDetail ──▶ Connector::fetch_full_detail
//!    │            │
//!    │            └─ sleeps the per-call delay before every attempt
//!    └─ classifies RemoteError, sleeps the backoff, tries again
//! ```
//!
//! The decorators are generic, so a call is built once per repository with
//! no boxing beyond what `async_trait` already does.

use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;

use codejson_harvester_core::models::{RepositoryDetail, RepositorySummary, ScanTarget};
use codejson_harvester_core::retry::{RetryDecision, RetryPolicy, RetryState};
use serde_json::{Map, Value};

use crate::error::RemoteError;
use crate::traits::{Analyzer, Connector};

/// One remote operation that can be attempted repeatedly.
#[async_trait]
pub trait RemoteCall: Send + Sync {
    type Output: Send;

    async fn call(&self) -> Result<Self::Output, RemoteError>;
}

// ═══════════════════════════════════════════════════════════════════════
// Decorators
// ═══════════════════════════════════════════════════════════════════════

/// Sleeps a fixed per-call delay before each attempt of the inner call.
pub struct Paced<C> {
    inner: C,
    delay: Duration,
}

impl<C> Paced<C> {
    pub fn new(inner: C, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<C: RemoteCall> RemoteCall for Paced<C> {
    type Output = C::Output;

    async fn call(&self) -> Result<Self::Output, RemoteError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.call().await
    }
}

/// Retries the inner call on rate-limit and transient failures.
///
/// Non-retryable errors propagate on the first occurrence. Once the policy
/// gives up, the last error is returned.
pub struct Retrying<C> {
    inner: C,
    policy: RetryPolicy,
    label: String,
}

impl<C> Retrying<C> {
    pub fn new(inner: C, policy: RetryPolicy, label: impl Into<String>) -> Self {
        Self {
            inner,
            policy,
            label: label.into(),
        }
    }
}

#[async_trait]
impl<C: RemoteCall> RemoteCall for Retrying<C> {
    type Output = C::Output;

    async fn call(&self) -> Result<Self::Output, RemoteError> {
        let mut state = RetryState::default();
        loop {
            let err = match self.inner.call().await {
                Ok(out) => {
                    if state.attempt > 0 {
                        tracing::debug!(
                            call = %self.label,
                            retries = state.attempt,
                            slept_secs = state.slept.as_secs_f64(),
                            "succeeded after retry"
                        );
                    }
                    return Ok(out);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            let sample = if self.policy.config().jitter > 0.0 {
                rand::thread_rng().gen_range(-1.0..=1.0)
            } else {
                0.0
            };
            match self.policy.next(state.attempt, err.retry_after(), sample) {
                RetryDecision::GiveUp => {
                    tracing::warn!(
                        call = %self.label,
                        attempts = state.attempt + 1,
                        error = %err,
                        "giving up after retries"
                    );
                    return Err(err);
                }
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        call = %self.label,
                        attempt = state.attempt + 1,
                        max_attempts = self.policy.max_attempts(),
                        delay_secs = delay.as_secs_f64(),
                        error = %err,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    state.record_sleep(delay);
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Collaborator calls
// ═══════════════════════════════════════════════════════════════════════

/// `Connector::list_repositories` as one remote operation.
pub struct ListRepositories<'a> {
    pub connector: &'a dyn Connector,
    pub target: &'a ScanTarget,
}

#[async_trait]
impl<'a> RemoteCall for ListRepositories<'a> {
    type Output = Vec<RepositorySummary>;

    async fn call(&self) -> Result<Self::Output, RemoteError> {
        self.connector.list_repositories(self.target).await
    }
}

/// `Connector::fetch_full_detail` for one repository.
pub struct FetchDetail<'a> {
    pub connector: &'a dyn Connector,
    pub summary: &'a RepositorySummary,
}

#[async_trait]
impl<'a> RemoteCall for FetchDetail<'a> {
    type Output = RepositoryDetail;

    async fn call(&self) -> Result<Self::Output, RemoteError> {
        self.connector.fetch_full_detail(self.summary).await
    }
}

/// Which analyzer step to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStep {
    ClassifyExemption,
    InferOrganization,
}

/// One analyzer step over a freshly fetched detail payload.
pub struct Analyze<'a> {
    pub analyzer: &'a dyn Analyzer,
    pub step: AnalysisStep,
    pub summary: &'a RepositorySummary,
    pub detail: &'a RepositoryDetail,
}

#[async_trait]
impl<'a> RemoteCall for Analyze<'a> {
    type Output = Map<String, Value>;

    async fn call(&self) -> Result<Self::Output, RemoteError> {
        match self.step {
            AnalysisStep::ClassifyExemption => {
                self.analyzer
                    .classify_exemption(self.summary, self.detail)
                    .await
            }
            AnalysisStep::InferOrganization => {
                self.analyzer
                    .infer_organization(self.summary, self.detail)
                    .await
            }
        }
    }
}
