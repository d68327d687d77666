//! Error taxonomy for remote calls and target runs.
//!
//! Remote collaborators return [`RemoteError`] so the retry decorator can
//! classify a failure with a `match`:
//!
//! | Variant | Retried | At discovery | At detail stage |
//! |---------|---------|--------------|-----------------|
//! | `RateLimited` | yes | fatal once exhausted | degraded record |
//! | `Transient` | yes | fatal once exhausted | degraded record |
//! | `Unauthorized` | no | fatal to target | degraded record |
//! | `NotFound` | no | fatal to target | degraded record |
//! | `Fatal` | no | fatal to target | degraded record |
//!
//! Everything above the remote boundary uses `anyhow`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("rate limited{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<Duration> },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Fatal(String),
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!(" (retry after {}s)", d.as_secs()),
        None => String::new(),
    }
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. } | RemoteError::Transient(_))
    }

    /// Server-provided wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP status code.
    pub fn from_status(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status, body.trim());
        match status {
            401 | 403 => RemoteError::Unauthorized(detail),
            404 => RemoteError::NotFound(detail),
            429 => RemoteError::RateLimited { retry_after },
            500..=599 => RemoteError::Transient(detail),
            _ => RemoteError::Fatal(detail),
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            RemoteError::Transient(err.to_string())
        } else if err.is_decode() {
            RemoteError::Fatal(format!("malformed response: {}", err))
        } else {
            RemoteError::Transient(err.to_string())
        }
    }
}

/// Why a target run aborted.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("no connector configured for platform '{0}'")]
    NoConnector(String),

    #[error("repository discovery failed: {0}")]
    Discovery(#[source] RemoteError),

    #[error("failed to write snapshot: {0}")]
    Snapshot(#[source] anyhow::Error),
}
