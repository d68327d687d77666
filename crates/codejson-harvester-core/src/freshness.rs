//! Cache freshness.
//!
//! A cached record is reused verbatim when the repository's content
//! fingerprint (`lastCommitSHA`) and its emptiness flag are unchanged.
//! The check yields a tagged [`Freshness`] so callers branch once instead
//! of scattering conditionals through the fetch path.

use std::collections::HashMap;

use crate::models::{IntermediateSnapshot, RepositoryIdentity, RepositoryRecord, RepositorySummary};

/// Why a repository needs a fresh fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    NotCached,
    CommitChanged,
    EmptinessChanged,
}

impl StaleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaleReason::NotCached => "not cached",
            StaleReason::CommitChanged => "commit changed",
            StaleReason::EmptinessChanged => "emptiness changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Freshness {
    /// The cached record, to be carried over unchanged.
    Fresh(RepositoryRecord),
    Stale(StaleReason),
}

/// True iff `entry` exists and matches both the current SHA and emptiness.
///
/// Two absent SHAs compare equal, so an empty repository that stays empty
/// is fresh.
pub fn is_fresh(
    current_sha: Option<&str>,
    current_is_empty: bool,
    entry: Option<&RepositoryRecord>,
) -> bool {
    classify(current_sha, current_is_empty, entry).is_none()
}

fn classify(
    current_sha: Option<&str>,
    current_is_empty: bool,
    entry: Option<&RepositoryRecord>,
) -> Option<StaleReason> {
    let entry = match entry {
        Some(e) if !e.is_degraded() => e,
        _ => return Some(StaleReason::NotCached),
    };
    if entry.last_commit_sha.as_deref() != current_sha {
        return Some(StaleReason::CommitChanged);
    }
    if entry.is_empty != current_is_empty {
        return Some(StaleReason::EmptinessChanged);
    }
    None
}

/// Previous run's records addressed by identity.
#[derive(Debug, Clone, Default)]
pub struct CacheIndex {
    entries: HashMap<RepositoryIdentity, RepositoryRecord>,
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a snapshot, skipping degraded records.
    pub fn from_snapshot(snapshot: IntermediateSnapshot) -> Self {
        Self::from_records(snapshot.records)
    }

    pub fn from_records(records: impl IntoIterator<Item = RepositoryRecord>) -> Self {
        let entries = records
            .into_iter()
            .filter(|r| !r.is_degraded())
            .map(|r| (r.identity.clone(), r))
            .collect();
        Self { entries }
    }

    pub fn get(&self, identity: &RepositoryIdentity) -> Option<&RepositoryRecord> {
        self.entries.get(identity)
    }

    pub fn check(&self, summary: &RepositorySummary) -> Freshness {
        let entry = self.get(&summary.identity);
        match classify(summary.last_commit_sha.as_deref(), summary.is_empty, entry) {
            None => match entry {
                Some(record) => Freshness::Fresh(record.clone()),
                None => Freshness::Stale(StaleReason::NotCached),
            },
            Some(reason) => Freshness::Stale(reason),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
